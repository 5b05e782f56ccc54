use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use fogwar_kernel::{ActorFeed, ActorRegistry, ApplyError, ApplyHandle, RebuildSink};
use parking_lot::Mutex;

use crate::classifier::{ClassifierStats, ProximityClassifier, ProximityConfig};

/// Snapshot of scheduler progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub passes: u64,
    pub last: ClassifierStats,
    pub average: Duration,
    pub max: Duration,
}

/// Requests an out-of-cadence pass. Requests made while one is pending
/// collapse into it.
#[derive(Clone)]
pub struct PassTrigger {
    sender: Sender<()>,
}

impl PassTrigger {
    pub fn trigger(&self) {
        let _ = self.sender.try_send(());
    }
}

/// Everything a pass reads from or writes to.
pub struct PassInputs {
    pub feed: Arc<dyn ActorFeed>,
    pub registry: Arc<ActorRegistry>,
    pub apply: ApplyHandle,
    pub sink: Arc<dyn RebuildSink>,
}

/// Runs proximity passes on a dedicated thread at a fixed period.
pub struct ClassifierScheduler {
    trigger: PassTrigger,
    shutdown: Sender<()>,
    stats: Arc<Mutex<SchedulerStats>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClassifierScheduler {
    /// Start the thread. The first pass runs immediately.
    pub fn spawn(config: ProximityConfig, inputs: PassInputs) -> std::io::Result<Self> {
        let (trigger_tx, trigger_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));

        let worker_stats = stats.clone();
        let worker = std::thread::Builder::new()
            .name("fog-proximity".into())
            .spawn(move || {
                let classifier = ProximityClassifier::new(config);
                run(classifier, inputs, trigger_rx, shutdown_rx, worker_stats);
            })?;

        Ok(Self {
            trigger: PassTrigger { sender: trigger_tx },
            shutdown: shutdown_tx,
            stats,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn trigger(&self) {
        self.trigger.trigger();
    }

    pub fn trigger_handle(&self) -> PassTrigger {
        self.trigger.clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Stop the thread after any pass in progress finishes.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.shutdown.try_send(());
        if worker.join().is_err() {
            tracing::error!("proximity scheduler panicked");
        }
    }
}

impl Drop for ClassifierScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut classifier: ProximityClassifier,
    inputs: PassInputs,
    trigger: Receiver<()>,
    shutdown: Receiver<()>,
    stats: Arc<Mutex<SchedulerStats>>,
) {
    let ticker = tick(classifier.config.period);
    tracing::debug!(period = ?classifier.config.period, "proximity scheduler started");

    let pass = |classifier: &mut ProximityClassifier| -> Result<(), ApplyError> {
        let samples = inputs.feed.samples();
        classifier.pass(samples, &inputs.registry, &inputs.apply, inputs.sink.as_ref())?;
        let mut stats = stats.lock();
        stats.passes = classifier.passes();
        stats.last = classifier.stats().clone();
        stats.average = classifier.timer().average();
        stats.max = classifier.timer().max();
        Ok(())
    };

    let mut result = pass(&mut classifier);
    while result.is_ok() {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => result = pass(&mut classifier),
            recv(trigger) -> msg => {
                if msg.is_err() {
                    break;
                }
                result = pass(&mut classifier);
            }
        }
    }

    if let Err(err) = result {
        tracing::warn!(error = %err, "proximity scheduler stopping");
    }
    tracing::debug!(passes = classifier.passes(), "proximity scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fogwar_common::{ActorId, ActorSample, HeightBounds, TilePosition, VisibilityState};
    use fogwar_kernel::{ApplyQueue, LayeredWorld, RecordingSink, VisibilityStore};
    use std::time::Instant;

    struct Setup {
        store: Arc<VisibilityStore>,
        queue: ApplyQueue,
        registry: Arc<ActorRegistry>,
        sink: Arc<RecordingSink>,
        position: Arc<Mutex<(f64, f64)>>,
        actor: ActorId,
    }

    fn setup() -> Setup {
        let store = Arc::new(VisibilityStore::default());
        store.attach_world(Arc::new(LayeredWorld::new(HeightBounds::new(0, 4), 1, 2)));
        let queue = ApplyQueue::spawn(store.clone()).unwrap();
        Setup {
            store,
            queue,
            registry: Arc::new(ActorRegistry::new()),
            sink: Arc::new(RecordingSink::new()),
            position: Arc::new(Mutex::new((8.0, 8.0))),
            actor: ActorId::new(),
        }
    }

    fn spawn(s: &Setup, period: Duration) -> ClassifierScheduler {
        let position = s.position.clone();
        let actor = s.actor;
        let feed = move || {
            let (x, z) = *position.lock();
            vec![ActorSample::at(actor, x, z)]
        };
        let config = ProximityConfig {
            period,
            ..ProximityConfig::default()
        };
        ClassifierScheduler::spawn(
            config,
            PassInputs {
                feed: Arc::new(feed),
                registry: s.registry.clone(),
                apply: s.queue.handle(),
                sink: s.sink.clone(),
            },
        )
        .unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn first_pass_runs_immediately() {
        let s = setup();
        s.registry.add(s.actor);
        let scheduler = spawn(&s, Duration::from_secs(3600));
        assert!(wait_for(|| scheduler.stats().passes >= 1));
        assert_eq!(s.store.get_state(TilePosition::new(2, 2)), VisibilityState::Fogged);
        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn registry_trigger_runs_out_of_cadence() {
        let s = setup();
        let scheduler = spawn(&s, Duration::from_secs(3600));
        assert!(wait_for(|| scheduler.stats().passes >= 1));
        assert!(scheduler.stats().last.skipped);

        let trigger = scheduler.trigger_handle();
        s.registry.subscribe(move |_| trigger.trigger());
        s.registry.add(s.actor);

        assert!(wait_for(|| s.store.stats().fogged == 16));
        assert_eq!(s.sink.batches().len(), 1);
        scheduler.shutdown();
    }

    #[test]
    fn periodic_passes_follow_the_actor() {
        let s = setup();
        s.registry.add(s.actor);
        let scheduler = spawn(&s, Duration::from_millis(10));
        assert!(wait_for(|| s.store.stats().fogged == 16));

        *s.position.lock() = (16.0 * 10.0 + 8.0, 8.0);
        assert!(wait_for(|| {
            s.store.get_state(TilePosition::new(8, 0)) == VisibilityState::Fogged
                && s.store.get_state(TilePosition::new(10, 0)) == VisibilityState::Visible
        }));
        scheduler.shutdown();
    }

    #[test]
    fn stops_when_apply_queue_closes() {
        let s = setup();
        s.registry.add(s.actor);
        s.queue.shutdown();
        let scheduler = spawn(&s, Duration::from_millis(10));
        assert!(wait_for(|| !scheduler.is_running()));
        scheduler.shutdown();
    }
}

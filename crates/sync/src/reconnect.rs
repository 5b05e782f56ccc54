use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use rand::Rng;

use crate::SyncError;
use crate::client::{ConnectionState, SyncClient};

/// Exponential backoff with jitter and an optional attempt bound.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random, in `0.0..=1.0`.
    pub jitter: f64,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let max = self.max_delay.as_secs_f64();
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent)).min(max);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rng.gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((base * factor).clamp(0.0, max))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorStatus {
    /// No identity yet; waiting for one.
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Waiting { attempt: u32, delay: Duration },
    GaveUp { attempts: u32 },
    Stopped,
}

/// How long to sleep between identity checks while idle.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Keeps a [`SyncClient`] connected according to a [`ReconnectPolicy`].
pub struct ReconnectSupervisor {
    status: Arc<Mutex<SupervisorStatus>>,
    wake: Sender<()>,
    shutdown: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    pub fn spawn(client: Arc<SyncClient>, policy: ReconnectPolicy) -> std::io::Result<Self> {
        let (wake_tx, wake_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let status = Arc::new(Mutex::new(SupervisorStatus::Idle));

        let worker_status = status.clone();
        let worker = std::thread::Builder::new()
            .name("fog-reconnect".into())
            .spawn(move || {
                Supervision {
                    client,
                    policy,
                    status: worker_status,
                    wake: wake_rx,
                    shutdown: shutdown_rx,
                }
                .run()
            })?;

        Ok(Self {
            status,
            wake: wake_tx,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.lock().clone()
    }

    /// Cut a backoff wait short, or start over after giving up.
    pub fn wake(&self) {
        let _ = self.wake.try_send(());
    }

    /// Stop supervising. The connection itself is left as it is.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.shutdown.try_send(());
        if worker.join().is_err() {
            tracing::error!("reconnect supervisor panicked");
        }
        *self.status.lock() = SupervisorStatus::Stopped;
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Wait {
    Elapsed,
    Woken,
    Shutdown,
}

struct Supervision {
    client: Arc<SyncClient>,
    policy: ReconnectPolicy,
    status: Arc<Mutex<SupervisorStatus>>,
    wake: Receiver<()>,
    shutdown: Receiver<()>,
}

impl Supervision {
    fn set(&self, status: SupervisorStatus) {
        *self.status.lock() = status;
    }

    fn wait(&self, timeout: Duration) -> Wait {
        select! {
            recv(self.shutdown) -> _ => Wait::Shutdown,
            recv(self.wake) -> msg => if msg.is_ok() { Wait::Woken } else { Wait::Shutdown },
            default(timeout) => Wait::Elapsed,
        }
    }

    fn run(self) {
        let disconnects = self.client.disconnects();
        let mut rng = rand::thread_rng();
        let mut attempts = 0u32;
        tracing::debug!(policy = ?self.policy, "reconnect supervisor started");

        loop {
            if self.client.state() == ConnectionState::Open {
                attempts = 0;
                self.set(SupervisorStatus::Connected);
                let stop = select! {
                    recv(self.shutdown) -> _ => true,
                    recv(disconnects) -> msg => msg.is_err(),
                };
                if stop {
                    break;
                }
                continue;
            }

            if self.policy.exhausted(attempts) {
                tracing::warn!(attempts, "giving up on fog authority");
                self.set(SupervisorStatus::GaveUp { attempts });
                let woken = select! {
                    recv(self.shutdown) -> _ => false,
                    recv(self.wake) -> msg => msg.is_ok(),
                };
                if !woken {
                    break;
                }
                attempts = 0;
                continue;
            }

            let attempt = attempts + 1;
            self.set(SupervisorStatus::Connecting { attempt });
            let error = match self.client.connect() {
                Ok(()) => continue,
                // A connect from elsewhere raced ours; look again.
                Err(SyncError::Busy(_)) | Err(SyncError::Interrupted) => {
                    if matches!(self.wait(IDLE_POLL), Wait::Shutdown) {
                        break;
                    }
                    continue;
                }
                Err(SyncError::MissingIdentity) => {
                    self.set(SupervisorStatus::Idle);
                    if matches!(self.wait(IDLE_POLL), Wait::Shutdown) {
                        break;
                    }
                    continue;
                }
                Err(err) => err,
            };

            attempts = attempt;
            let delay = self.policy.delay(attempt, &mut rng);
            tracing::warn!(attempt, ?delay, error = %error, "fog authority connect failed");
            self.set(SupervisorStatus::Waiting { attempt, delay });
            // Stale disconnect notices from failed attempts.
            while disconnects.try_recv().is_ok() {}
            if matches!(self.wait(delay), Wait::Shutdown) {
                break;
            }
        }

        self.set(SupervisorStatus::Stopped);
        tracing::debug!("reconnect supervisor stopped");
    }
}

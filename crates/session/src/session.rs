use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fogwar_kernel::{
    ActorFeed, ActorRegistry, ApplyError, ApplyHandle, ApplyQueue, FogView, RebuildSink,
    VisibilityStore, VoxelReader,
};
use fogwar_persist::{ActorStore, LoadOutcome, RecordError, RecordStore, RecordSummary, SessionKey};
use fogwar_stream::{ClassifierScheduler, PassInputs, SchedulerStats};
use fogwar_sync::{
    ConnectionState, Connector, MessageApplier, ReconnectSupervisor, SupervisorStatus, SyncClient,
    SyncError,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::{ConfigError, FogConfig};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("record: {0}")]
    Record(#[from] RecordError),
    #[error("sync: {0}")]
    Sync(#[from] SyncError),
    #[error("{0}")]
    Apply(#[from] ApplyError),
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("session is shut down")]
    ShutDown,
}

/// What the embedding host supplies.
pub struct Collaborators {
    pub world: Option<Arc<dyn VoxelReader>>,
    pub feed: Arc<dyn ActorFeed>,
    pub sink: Arc<dyn RebuildSink>,
    pub connector: Arc<dyn Connector>,
}

/// Result of [`FogSession::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginReport {
    pub record: LoadOutcome,
    pub actors: usize,
}

/// Result of [`FogSession::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndReport {
    pub record: RecordSummary,
    pub actors: usize,
}

/// One running fog core: store, actor registry, apply queue, proximity
/// scheduler, authority connection, and per-session persistence.
pub struct FogSession {
    config: FogConfig,
    store: Arc<VisibilityStore>,
    registry: Arc<ActorRegistry>,
    queue: ApplyQueue,
    apply: ApplyHandle,
    scheduler: ClassifierScheduler,
    client: Arc<SyncClient>,
    supervisor: ReconnectSupervisor,
    records: Arc<Mutex<RecordStore>>,
    actors: ActorStore,
    active: Mutex<Option<SessionKey>>,
    stopped: AtomicBool,
}

impl FogSession {
    /// Build and start every component. No session is active yet.
    pub fn start(config: FogConfig, collaborators: Collaborators) -> Result<Self, SessionError> {
        config.validate()?;
        let policy = config.store_policy().map_err(ConfigError::from)?;
        let appearance = config.fog_appearance().map_err(ConfigError::from)?;

        let store = Arc::new(VisibilityStore::new(policy));
        store.set_default_appearance(appearance);
        if let Some(world) = collaborators.world {
            store.attach_world(world);
        }

        let records = RecordStore::open(&config.data_dir)?;
        let actors = ActorStore::new(&config.data_dir);

        let queue = ApplyQueue::spawn(store.clone()).map_err(|e| SessionError::Spawn("apply", e))?;
        let apply = queue.handle();
        let registry = Arc::new(ActorRegistry::new());

        let scheduler = ClassifierScheduler::spawn(
            config.proximity_config(),
            PassInputs {
                feed: collaborators.feed,
                registry: registry.clone(),
                apply: apply.clone(),
                sink: collaborators.sink.clone(),
            },
        )
        .map_err(|e| SessionError::Spawn("proximity", e))?;
        let trigger = scheduler.trigger_handle();
        registry.subscribe(move |_| trigger.trigger());

        let applier = MessageApplier::new(apply.clone(), registry.clone(), collaborators.sink);
        let client = Arc::new(SyncClient::new(
            collaborators.connector,
            applier,
            config.client_options(),
        )?);
        let supervisor = ReconnectSupervisor::spawn(client.clone(), config.reconnect_policy())
            .map_err(|e| SessionError::Spawn("reconnect", e))?;

        tracing::info!(
            default_state = %policy.default_state(),
            endpoint = %client.endpoint(),
            endpoint_supported = client.endpoint_supported(),
            data_dir = %config.data_dir.display(),
            "fog session started"
        );

        Ok(Self {
            config,
            store,
            registry,
            queue,
            apply,
            scheduler,
            client,
            supervisor,
            records: Arc::new(Mutex::new(records)),
            actors,
            active: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &FogConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<VisibilityStore> {
        self.store.clone()
    }

    pub fn view(&self) -> FogView {
        FogView::new(self.store.clone())
    }

    pub fn registry(&self) -> Arc<ActorRegistry> {
        self.registry.clone()
    }

    pub fn apply_handle(&self) -> ApplyHandle {
        self.apply.clone()
    }

    pub fn active(&self) -> Option<SessionKey> {
        self.active.lock().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Whether the connector can open the configured endpoint at all.
    pub fn endpoint_supported(&self) -> bool {
        self.client.endpoint_supported()
    }

    pub fn supervisor_status(&self) -> SupervisorStatus {
        self.supervisor.status()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Point the authority connection somewhere else. An open connection is
    /// dropped and re-established against the new endpoint.
    pub fn set_endpoint(&self, raw: &str) -> Result<bool, SessionError> {
        let changed = self.client.set_endpoint(raw)?;
        if changed {
            self.supervisor.wake();
        }
        Ok(changed)
    }

    /// Enter a session: load its record and tracked actors, then let the
    /// supervisor connect as `identity`.
    ///
    /// An active session is ended first. If the record cannot be loaded the
    /// store is left empty and no session becomes active.
    pub fn begin(&self, key: SessionKey, identity: Option<Uuid>) -> Result<BeginReport, SessionError> {
        self.ensure_running()?;
        if self.active().is_some() {
            self.end()?;
        }

        let records = self.records.clone();
        let load_key = key.clone();
        let record = self.apply.run(move |store| records.lock().load(&load_key, store))??;

        let actors = match self.actors.load(&key, &self.registry) {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(%key, error = %err, "could not load tracked actors, starting with none");
                self.registry.clear();
                0
            }
        };

        *self.active.lock() = Some(key.clone());
        self.client.set_identity(identity);
        self.supervisor.wake();
        self.scheduler.trigger();
        tracing::info!(%key, ?record, actors, "fog session begun");
        Ok(BeginReport { record, actors })
    }

    /// Persist the active session without ending it.
    pub fn save(&self) -> Result<Option<EndReport>, SessionError> {
        let Some(key) = self.active() else {
            return Ok(None);
        };
        self.save_key(&key).map(Some)
    }

    /// Leave the active session: disconnect, persist, and clear in-memory state.
    pub fn end(&self) -> Result<Option<EndReport>, SessionError> {
        let Some(key) = self.active.lock().take() else {
            return Ok(None);
        };
        self.client.set_identity(None);
        self.client.close(self.client.close_timeout());

        let report = self.save_key(&key);
        let cleared = self.apply.run(|store| store.clear_all());
        self.registry.clear();
        let report = report?;
        cleared?;
        tracing::info!(%key, tiles = report.record.tiles, actors = report.actors, "fog session ended");
        Ok(Some(report))
    }

    fn save_key(&self, key: &SessionKey) -> Result<EndReport, SessionError> {
        let records = self.records.clone();
        let save_key = key.clone();
        let record = self.apply.run(move |store| records.lock().save(&save_key, store))??;
        let actors = self.actors.save(key, &self.registry)?;
        Ok(EndReport { record, actors })
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SessionError::ShutDown);
        }
        Ok(())
    }

    /// Stop everything: the proximity scheduler, then the authority
    /// connection, then persist the active session, then drain the apply
    /// queue. Later calls do nothing.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("fog session shutting down");

        self.scheduler.shutdown();
        self.supervisor.shutdown();
        if !self.client.close(self.client.close_timeout()) {
            tracing::warn!("authority connection did not close in time");
        }

        let saved = match self.active.lock().take() {
            Some(key) => self.save_key(&key).map(|report| {
                tracing::info!(%key, tiles = report.record.tiles, "fog session persisted on shutdown");
            }),
            None => Ok(()),
        };

        self.queue.shutdown();
        tracing::info!("fog session stopped");
        saved
    }
}

impl Drop for FogSession {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(error = %err, "fog session shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fogwar_common::{
        ActorId, ActorSample, HeightBounds, TilePosition, VisibilityState, VoxelClass, VoxelQuery,
    };
    use fogwar_kernel::{FogFill, LayeredWorld, RecordingSink};
    use fogwar_sync::{MemoryConnector, MemoryListener, TcpLineConnector};
    use std::time::{Duration, Instant};

    struct Harness {
        _dir: tempfile::TempDir,
        config: FogConfig,
        listener: MemoryListener,
        sink: Arc<RecordingSink>,
        position: Arc<Mutex<(f64, f64)>>,
        actor: ActorId,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FogConfig {
            data_dir: dir.path().join("fog_data"),
            ..FogConfig::default()
        };
        config.proximity.period_ms = 20;
        config.reconnect.initial_delay_ms = 5;
        config.reconnect.max_delay_ms = 20;
        let (_connector, listener) = MemoryConnector::pair();
        Harness {
            _dir: dir,
            config,
            listener,
            sink: Arc::new(RecordingSink::new()),
            position: Arc::new(Mutex::new((8.0, 8.0))),
            actor: ActorId::new(),
        }
    }

    fn start(h: &mut Harness) -> FogSession {
        let (connector, listener) = MemoryConnector::pair();
        h.listener = listener;
        let position = h.position.clone();
        let actor = h.actor;
        let feed = move || {
            let (x, z) = *position.lock();
            vec![ActorSample::at(actor, x, z)]
        };
        FogSession::start(
            h.config.clone(),
            Collaborators {
                world: Some(Arc::new(LayeredWorld::new(HeightBounds::new(0, 8), 3, 5))),
                feed: Arc::new(feed),
                sink: h.sink.clone(),
                connector: Arc::new(connector),
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
    fn invalid_config_is_rejected() {
        let mut h = harness();
        h.config.default_state = VisibilityState::Fogged;
        let (connector, _listener) = MemoryConnector::pair();
        let result = FogSession::start(
            h.config.clone(),
            Collaborators {
                world: None,
                feed: Arc::new(Vec::<ActorSample>::new),
                sink: h.sink.clone(),
                connector: Arc::new(connector),
            },
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn secure_endpoint_over_plain_tcp_is_reported() {
        let mut h = harness();
        h.config.websocket_endpoint = "https://fog.example.net".into();
        let session = FogSession::start(
            h.config.clone(),
            Collaborators {
                world: None,
                feed: Arc::new(Vec::<ActorSample>::new),
                sink: h.sink.clone(),
                connector: Arc::new(TcpLineConnector),
            },
        )
        .unwrap();
        assert!(!session.endpoint_supported());
        assert!(session.set_endpoint("ws://127.0.0.1:9").unwrap());
        assert!(session.endpoint_supported());
        session.shutdown().unwrap();
    }

    #[test]
    fn tracked_actor_reveals_nearby_and_fogs_the_ring() {
        let mut h = harness();
        let session = start(&mut h);
        session.begin(SessionKey::new("overworld", "steve"), None).unwrap();
        session.registry().add(h.actor);

        let view = session.view();
        let ring = TilePosition::new(2, 0);
        assert!(wait_for(|| view.is_fogged(ring)));
        assert!(view.is_visible(TilePosition::new(0, 0)));
        assert_eq!(view.query_voxel(32, 1, 0), Some(VoxelQuery::Solid));
        assert_eq!(view.fill_for(40, 4, 3), Some(FogFill::Snapshot(VoxelClass::Liquid)));
        assert!(h.sink.all_tiles().contains(&ring));

        *h.position.lock() = (40.0, 8.0);
        assert!(wait_for(|| view.is_visible(ring)));
        assert_eq!(view.query_voxel(32, 1, 0), None);
        session.shutdown().unwrap();
    }

    #[test]
    fn authority_frames_and_actor_directives_flow_into_the_session() {
        let mut h = harness();
        let session = start(&mut h);
        let identity = Uuid::new_v4();
        session
            .begin(SessionKey::new("overworld", "alex"), Some(identity))
            .unwrap();

        let peer = h.listener.accept(Duration::from_secs(2)).unwrap();
        assert!(peer.uri.ends_with(&format!("uuid={identity}")));
        assert!(wait_for(|| session.supervisor_status() == SupervisorStatus::Connected));

        peer.send(r#"{"foggedChunks":[{"x":7,"z":7,"state":"HIDDEN"}]}"#);
        let view = session.view();
        assert!(wait_for(|| view.is_hidden(TilePosition::new(7, 7))));

        peer.send(format!(r#"{{"npcUuids":["{}"]}}"#, h.actor));
        assert!(wait_for(|| session.registry().contains(&h.actor)));
        assert!(wait_for(|| session.scheduler_stats().last.actors == 1));
        session.shutdown().unwrap();
    }

    #[test]
    fn end_and_begin_restore_persisted_state() {
        let mut h = harness();
        let key = SessionKey::new("overworld", "steve");
        let hidden = TilePosition::new(-3, 4);
        let fogged = TilePosition::new(40, 40);

        let first_snapshot = {
            let session = start(&mut h);
            session.begin(key.clone(), None).unwrap();
            let handle = session.apply_handle();
            handle
                .run(move |store| {
                    store.set_state(hidden, VisibilityState::Hidden);
                    store.set_state(fogged, VisibilityState::Fogged);
                })
                .unwrap();
            // Tracked but never sampled, so no proximity passes touch the store.
            session.registry().add(ActorId::new());
            let snapshot = session.store().get_snapshot(fogged).unwrap();

            let report = session.end().unwrap().unwrap();
            assert_eq!(report.actors, 1);
            assert_eq!(report.record.snapshots, 1);
            assert!(session.store().is_empty());
            assert!(session.registry().is_empty());
            assert_eq!(session.end().unwrap(), None);
            snapshot
        };

        let session = start(&mut h);
        let report = session.begin(key, None).unwrap();
        assert!(matches!(report.record, LoadOutcome::Loaded(_)));
        assert_eq!(report.actors, 1);
        let store = session.store();
        assert_eq!(store.get_state(hidden), VisibilityState::Hidden);
        assert_eq!(store.get_snapshot(fogged).unwrap().data(), first_snapshot.data());
        session.shutdown().unwrap();
    }

    #[test]
    fn shutdown_persists_active_session_once() {
        let mut h = harness();
        let key = SessionKey::new("nether", "steve");
        let session = start(&mut h);
        session.begin(key.clone(), Some(Uuid::new_v4())).unwrap();
        session
            .apply_handle()
            .run(|store| {
                store.set_state(TilePosition::new(1, 1), VisibilityState::Hidden);
            })
            .unwrap();

        session.shutdown().unwrap();
        session.shutdown().unwrap();
        assert_eq!(session.supervisor_status(), SupervisorStatus::Stopped);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert!(matches!(session.begin(key.clone(), None), Err(SessionError::ShutDown)));

        let records = RecordStore::open(&h.config.data_dir).unwrap();
        let record = records.read(&key).unwrap().unwrap();
        assert_eq!(record.summary().hidden, 1);
    }

    #[test]
    fn corrupt_record_leaves_store_empty_and_session_inactive() {
        let mut h = harness();
        let key = SessionKey::new("overworld", "steve");
        let session = start(&mut h);
        let path = session.records.lock().record_path(&key);
        std::fs::write(&path, b"not a record").unwrap();

        assert!(matches!(session.begin(key, None), Err(SessionError::Record(_))));
        assert!(session.store().is_empty());
        assert_eq!(session.active(), None);
        session.shutdown().unwrap();
    }
}

use crate::SyncError;
use crate::apply::MessageApplier;
use crate::endpoint::{connect_uri, normalize_endpoint};
use crate::transport::{CloseHandle, Connection, Connector};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8080/api/fog/ws".into(),
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// State plus a generation bumped on every connect and close, so a reader
/// thread from an older connection can never overwrite a newer state.
struct Status {
    state: ConnectionState,
    generation: u64,
}

struct Shared {
    status: Mutex<Status>,
    disconnects: Sender<u64>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.status.lock().generation == generation
    }

    /// Mark the connection of `generation` as gone. Stale generations change nothing.
    fn disconnected(&self, generation: u64) {
        {
            let mut status = self.status.lock();
            if status.generation == generation {
                status.state = ConnectionState::Disconnected;
            }
        }
        let _ = self.disconnects.send(generation);
    }
}

#[derive(Default)]
struct Live {
    close: Option<Box<dyn CloseHandle>>,
    reader: Option<JoinHandle<()>>,
}

/// Receives the authority's fog stream and feeds it to the apply queue.
pub struct SyncClient {
    connector: Arc<dyn Connector>,
    applier: MessageApplier,
    endpoint: RwLock<String>,
    identity: RwLock<Option<Uuid>>,
    connect_timeout: Duration,
    close_timeout: Duration,
    shared: Arc<Shared>,
    disconnects: Receiver<u64>,
    live: Mutex<Live>,
}

impl SyncClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        applier: MessageApplier,
        options: ClientOptions,
    ) -> Result<Self, SyncError> {
        let endpoint = normalize_endpoint(&options.endpoint)?;
        warn_if_unsupported(connector.as_ref(), &endpoint);
        let (disconnects_tx, disconnects) = unbounded();
        Ok(Self {
            connector,
            applier,
            endpoint: RwLock::new(endpoint),
            identity: RwLock::new(None),
            connect_timeout: options.connect_timeout,
            close_timeout: options.close_timeout,
            shared: Arc::new(Shared {
                status: Mutex::new(Status {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                }),
                disconnects: disconnects_tx,
            }),
            disconnects,
            live: Mutex::new(Live::default()),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.read().clone()
    }

    pub fn identity(&self) -> Option<Uuid> {
        *self.identity.read()
    }

    pub fn set_identity(&self, identity: Option<Uuid>) {
        *self.identity.write() = identity;
    }

    /// Whether the connector can open the current endpoint's scheme.
    pub fn endpoint_supported(&self) -> bool {
        scheme_supported(self.connector.as_ref(), &self.endpoint.read())
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Generations of connections that have ended.
    pub fn disconnects(&self) -> Receiver<u64> {
        self.disconnects.clone()
    }

    /// Change the endpoint. An open connection is closed so the next connect
    /// uses the new address. Returns whether the endpoint changed.
    pub fn set_endpoint(&self, raw: &str) -> Result<bool, SyncError> {
        let endpoint = normalize_endpoint(raw)?;
        {
            let mut current = self.endpoint.write();
            if *current == endpoint {
                return Ok(false);
            }
            tracing::info!(from = %current, to = %endpoint, "fog endpoint changed");
            warn_if_unsupported(self.connector.as_ref(), &endpoint);
            *current = endpoint;
        }
        if self.state() == ConnectionState::Open {
            self.close(self.close_timeout);
        }
        Ok(true)
    }

    /// Open a connection and start the reader thread.
    pub fn connect(&self) -> Result<(), SyncError> {
        let identity = self.identity().ok_or(SyncError::MissingIdentity)?;
        let generation = {
            let mut status = self.shared.status.lock();
            if status.state != ConnectionState::Disconnected {
                return Err(SyncError::Busy(status.state));
            }
            status.state = ConnectionState::Connecting;
            status.generation += 1;
            status.generation
        };

        let uri = connect_uri(&self.endpoint(), identity);
        tracing::debug!(%uri, generation, "connecting to fog authority");
        let connection = match self.connector.connect(&uri, self.connect_timeout) {
            Ok(connection) => connection,
            Err(err) => {
                self.shared.disconnected(generation);
                return Err(err.into());
            }
        };

        let close = connection.close_handle();
        let shared = self.shared.clone();
        let applier = self.applier.clone();
        let reader = std::thread::Builder::new()
            .name("fog-sync-reader".into())
            .spawn(move || read_loop(connection, applier, shared, generation));
        let reader = match reader {
            Ok(reader) => reader,
            Err(err) => {
                close.close();
                self.shared.disconnected(generation);
                return Err(SyncError::Spawn(err));
            }
        };

        // Open and the live handles are published together, so a concurrent
        // close either sees both or makes this connect fail.
        {
            let mut live = self.live.lock();
            let mut status = self.shared.status.lock();
            if status.generation != generation || status.state != ConnectionState::Connecting {
                drop(status);
                drop(live);
                close.close();
                return Err(SyncError::Interrupted);
            }
            status.state = ConnectionState::Open;
            if let Some(stale) = live.close.replace(close) {
                stale.close();
            }
            live.reader = Some(reader);
        }
        tracing::info!(%uri, "fog sync connected");
        Ok(())
    }

    /// Close the connection and wait up to `timeout` for the reader to stop.
    ///
    /// Returns false when the reader was still running at the deadline; it
    /// is then left to finish on its own.
    pub fn close(&self, timeout: Duration) -> bool {
        let generation = {
            let mut status = self.shared.status.lock();
            if status.state == ConnectionState::Disconnected {
                return true;
            }
            status.state = ConnectionState::Closing;
            status.generation
        };

        let Live { close, reader } = std::mem::take(&mut *self.live.lock());
        if let Some(close) = close {
            close.close();
        }

        let mut joined = true;
        if let Some(reader) = reader {
            let deadline = Instant::now() + timeout;
            while !reader.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if reader.is_finished() {
                if reader.join().is_err() {
                    tracing::error!("fog sync reader panicked");
                }
            } else {
                tracing::warn!(?timeout, "fog sync reader did not stop in time, detaching");
                joined = false;
            }
        }

        {
            let mut status = self.shared.status.lock();
            if status.generation == generation {
                status.generation += 1;
            }
            status.state = ConnectionState::Disconnected;
        }
        let _ = self.shared.disconnects.send(generation);
        tracing::info!("fog sync closed");
        joined
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.close(self.close_timeout);
    }
}

fn scheme_supported(connector: &dyn Connector, endpoint: &str) -> bool {
    endpoint
        .split_once("://")
        .is_some_and(|(scheme, _)| connector.supports_scheme(scheme))
}

fn warn_if_unsupported(connector: &dyn Connector, endpoint: &str) {
    if !scheme_supported(connector, endpoint) {
        tracing::warn!(%endpoint, "connector cannot open this endpoint's scheme, connects will fail");
    }
}

fn read_loop(mut connection: Box<dyn Connection>, applier: MessageApplier, shared: Arc<Shared>, generation: u64) {
    let mut frames = 0u64;
    loop {
        match connection.recv() {
            Ok(Some(frame)) => {
                if !shared.is_current(generation) {
                    break;
                }
                frames += 1;
                if let Err(err) = applier.handle_frame(&frame) {
                    tracing::warn!(error = %err, "apply queue closed, dropping connection");
                    connection.close_handle().close();
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(frames, "fog authority closed the connection");
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, frames, "fog connection read failed");
                break;
            }
        }
    }
    shared.disconnected(generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryListener, TcpLineConnector, TransportError};
    use fogwar_common::{TilePosition, VisibilityState};
    use fogwar_kernel::{ActorRegistry, ApplyQueue, NullSink, VisibilityStore};

    struct Fixture {
        store: Arc<VisibilityStore>,
        queue: ApplyQueue,
        listener: MemoryListener,
        client: Arc<SyncClient>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(VisibilityStore::default());
        let queue = ApplyQueue::spawn(store.clone()).unwrap();
        let applier = MessageApplier::new(queue.handle(), Arc::new(ActorRegistry::new()), Arc::new(NullSink));
        let (connector, listener) = MemoryConnector::pair();
        let client = SyncClient::new(Arc::new(connector), applier, ClientOptions::default()).unwrap();
        Fixture {
            store,
            queue,
            listener,
            client: Arc::new(client),
        }
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
    fn connect_requires_identity() {
        let f = fixture();
        assert!(matches!(f.client.connect(), Err(SyncError::MissingIdentity)));
        assert_eq!(f.client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn frames_reach_the_store() {
        let f = fixture();
        let id = Uuid::new_v4();
        f.client.set_identity(Some(id));
        f.client.connect().unwrap();
        assert_eq!(f.client.state(), ConnectionState::Open);
        assert!(matches!(f.client.connect(), Err(SyncError::Busy(ConnectionState::Open))));

        let peer = f.listener.accept(Duration::from_secs(1)).unwrap();
        assert_eq!(peer.uri, format!("ws://localhost:8080/api/fog/ws?uuid={id}"));
        peer.send(r#"{"foggedChunks":[{"x":4,"z":4,"state":"HIDDEN"}]}"#);
        assert!(wait_for(|| f.store.get_state(TilePosition::new(4, 4)) == VisibilityState::Hidden));

        peer.close();
        assert!(wait_for(|| f.client.state() == ConnectionState::Disconnected));
        assert!(f.client.disconnects().recv_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn local_close_joins_reader() {
        let f = fixture();
        f.client.set_identity(Some(Uuid::new_v4()));
        f.client.connect().unwrap();
        let _peer = f.listener.accept(Duration::from_secs(1)).unwrap();
        assert!(f.client.close(Duration::from_secs(1)));
        assert_eq!(f.client.state(), ConnectionState::Disconnected);
        assert!(f.client.close(Duration::from_secs(1)));
    }

    #[test]
    fn refused_connect_returns_to_disconnected() {
        let f = fixture();
        f.client.set_identity(Some(Uuid::new_v4()));
        drop(f.listener);
        assert!(matches!(
            f.client.connect(),
            Err(SyncError::Transport(TransportError::Refused(_)))
        ));
        assert_eq!(f.client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn endpoint_change_closes_open_connection() {
        let f = fixture();
        f.client.set_identity(Some(Uuid::new_v4()));
        f.client.connect().unwrap();
        let _peer = f.listener.accept(Duration::from_secs(1)).unwrap();

        assert!(!f.client.set_endpoint("localhost:8080").unwrap());
        assert_eq!(f.client.state(), ConnectionState::Open);
        assert!(f.client.set_endpoint("https://fog.example.net").unwrap());
        assert_eq!(f.client.endpoint(), "wss://fog.example.net/api/fog/ws");
        assert_eq!(f.client.state(), ConnectionState::Disconnected);
        assert!(f.client.set_endpoint("").is_err());
        assert_eq!(f.client.endpoint(), "wss://fog.example.net/api/fog/ws");
    }

    /// Closes its client from inside `connect`, as a concurrent close would.
    struct ClosingConnector {
        inner: MemoryConnector,
        client: std::sync::OnceLock<std::sync::Weak<SyncClient>>,
    }

    impl Connector for ClosingConnector {
        fn connect(&self, uri: &str, timeout: Duration) -> Result<Box<dyn Connection>, TransportError> {
            let connection = self.inner.connect(uri, timeout)?;
            if let Some(client) = self.client.get().and_then(std::sync::Weak::upgrade) {
                client.close(Duration::from_secs(1));
            }
            Ok(connection)
        }
    }

    #[test]
    fn close_during_connect_shuts_the_new_connection() {
        let store = Arc::new(VisibilityStore::default());
        let queue = ApplyQueue::spawn(store).unwrap();
        let applier = MessageApplier::new(queue.handle(), Arc::new(ActorRegistry::new()), Arc::new(NullSink));
        let (inner, listener) = MemoryConnector::pair();
        let connector = Arc::new(ClosingConnector {
            inner,
            client: std::sync::OnceLock::new(),
        });
        let client = Arc::new(SyncClient::new(connector.clone(), applier, ClientOptions::default()).unwrap());
        connector.client.set(Arc::downgrade(&client)).unwrap();
        client.set_identity(Some(Uuid::new_v4()));

        assert!(matches!(client.connect(), Err(SyncError::Interrupted)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        let peer = listener.accept(Duration::from_secs(1)).unwrap();
        assert!(wait_for(|| !peer.send("{}")));
        assert!(client.live.lock().close.is_none());
    }

    #[test]
    fn unsupported_scheme_is_reported() {
        let store = Arc::new(VisibilityStore::default());
        let queue = ApplyQueue::spawn(store).unwrap();
        let applier = MessageApplier::new(queue.handle(), Arc::new(ActorRegistry::new()), Arc::new(NullSink));
        let options = ClientOptions {
            endpoint: "https://fog.example.net".into(),
            ..ClientOptions::default()
        };
        let client = SyncClient::new(Arc::new(TcpLineConnector), applier, options).unwrap();
        assert!(!client.endpoint_supported());
        assert!(client.set_endpoint("http://fog.example.net").unwrap());
        assert!(client.endpoint_supported());
    }

    #[test]
    fn frames_after_queue_shutdown_drop_connection() {
        let f = fixture();
        f.client.set_identity(Some(Uuid::new_v4()));
        f.client.connect().unwrap();
        let peer = f.listener.accept(Duration::from_secs(1)).unwrap();
        f.queue.shutdown();
        peer.send(r#"{"foggedChunks":[{"x":0,"z":0}]}"#);
        assert!(wait_for(|| f.client.state() == ConnectionState::Disconnected));
    }
}

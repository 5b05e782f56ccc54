//! Frame transports for the authority channel.
//!
//! A connection delivers whole text frames. Two transports ship here: newline
//! delimited JSON over TCP, and an in-process channel pair.

use crate::endpoint::authority;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Opens connections to an authority.
pub trait Connector: Send + Sync {
    fn connect(&self, uri: &str, timeout: Duration) -> Result<Box<dyn Connection>, TransportError>;

    /// Whether `scheme://` uris can be opened at all.
    fn supports_scheme(&self, _scheme: &str) -> bool {
        true
    }
}

/// One open channel to the authority.
pub trait Connection: Send {
    /// Next text frame; `None` once the remote side has closed.
    fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Handle that closes this connection from another thread, unblocking `recv`.
    fn close_handle(&self) -> Box<dyn CloseHandle>;
}

pub trait CloseHandle: Send + Sync {
    fn close(&self);
}

/// Newline-delimited JSON frames over plain TCP.
///
/// The handshake is a single `{"hello":{"uri":..}}` line carrying the full
/// connect uri, identity included.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpLineConnector;

const WS_DEFAULT_PORT: u16 = 80;

impl Connector for TcpLineConnector {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "ws"
    }

    fn connect(&self, uri: &str, timeout: Duration) -> Result<Box<dyn Connection>, TransportError> {
        let (scheme, host, port) = authority(uri).ok_or_else(|| TransportError::InvalidUri(uri.to_string()))?;
        if !self.supports_scheme(scheme) {
            return Err(TransportError::UnsupportedScheme(scheme.to_string()));
        }
        let port = port.unwrap_or(WS_DEFAULT_PORT);

        let mut last_err = None;
        let mut stream = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let stream = match (stream, last_err) {
            (Some(stream), _) => stream,
            (None, Some(err)) => return Err(err.into()),
            (None, None) => return Err(TransportError::Refused(format!("{host}:{port} did not resolve"))),
        };
        let _ = stream.set_nodelay(true);

        let hello = serde_json::json!({ "hello": { "uri": uri } });
        let mut writer = BufWriter::new(stream.try_clone()?);
        writeln!(writer, "{hello}")?;
        writer.flush()?;

        Ok(Box::new(TcpLineConnection {
            closer: stream.try_clone()?,
            reader: BufReader::new(stream),
            line: String::new(),
        }))
    }
}

struct TcpLineConnection {
    reader: BufReader<TcpStream>,
    closer: TcpStream,
    line: String,
}

impl Connection for TcpLineConnection {
    fn recv(&mut self) -> Result<Option<String>, TransportError> {
        self.line.clear();
        match self.reader.read_line(&mut self.line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(self.line.trim_end_matches(['\r', '\n']).to_string())),
            // A local shutdown surfaces as a reset on some platforms.
            Err(err) if err.kind() == std::io::ErrorKind::ConnectionAborted => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn close_handle(&self) -> Box<dyn CloseHandle> {
        match self.closer.try_clone() {
            Ok(stream) => Box::new(TcpCloseHandle(Some(stream))),
            Err(err) => {
                tracing::warn!(error = %err, "could not clone stream for close handle");
                Box::new(TcpCloseHandle(None))
            }
        }
    }
}

struct TcpCloseHandle(Option<TcpStream>);

impl CloseHandle for TcpCloseHandle {
    fn close(&self) {
        if let Some(stream) = &self.0 {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// The authority end of an in-process connection.
pub struct MemoryPeer {
    pub uri: String,
    frames: Sender<String>,
}

impl MemoryPeer {
    /// Returns false once the client side is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.frames.send(frame.into()).is_ok()
    }

    /// Close from the authority side.
    pub fn close(self) {}
}

/// Accepts in-process connections made through a [`MemoryConnector`].
pub struct MemoryListener {
    accepted: Receiver<MemoryPeer>,
}

impl MemoryListener {
    pub fn accept(&self, timeout: Duration) -> Option<MemoryPeer> {
        self.accepted.recv_timeout(timeout).ok()
    }
}

/// Connector whose connections are served by a [`MemoryListener`].
///
/// Connecting fails once the listener has been dropped.
#[derive(Clone)]
pub struct MemoryConnector {
    accept: Sender<MemoryPeer>,
}

impl MemoryConnector {
    pub fn pair() -> (Self, MemoryListener) {
        let (accept, accepted) = unbounded();
        (Self { accept }, MemoryListener { accepted })
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, uri: &str, _timeout: Duration) -> Result<Box<dyn Connection>, TransportError> {
        let (frames_tx, frames_rx) = unbounded();
        let (close_tx, close_rx) = bounded(1);
        let peer = MemoryPeer {
            uri: uri.to_string(),
            frames: frames_tx,
        };
        self.accept
            .send(peer)
            .map_err(|_| TransportError::Refused("no listener".into()))?;
        Ok(Box::new(MemoryConnection {
            frames: frames_rx,
            closed: close_rx,
            close: close_tx,
        }))
    }
}

struct MemoryConnection {
    frames: Receiver<String>,
    closed: Receiver<()>,
    close: Sender<()>,
}

impl Connection for MemoryConnection {
    fn recv(&mut self) -> Result<Option<String>, TransportError> {
        select! {
            recv(self.closed) -> _ => Ok(None),
            recv(self.frames) -> frame => Ok(frame.ok()),
        }
    }

    fn close_handle(&self) -> Box<dyn CloseHandle> {
        Box::new(MemoryCloseHandle(self.close.clone()))
    }
}

struct MemoryCloseHandle(Sender<()>);

impl CloseHandle for MemoryCloseHandle {
    fn close(&self) {
        let _ = self.0.try_send(());
    }
}

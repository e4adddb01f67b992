//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! A [`Connection`] is the server-side state for one client: the RTSP
//! socket, a session ID assigned on first SETUP, the play flag, and
//! per-stream RTP state (sequence number, counters, attached transport).
//! Connections live in the process-wide [`ConnectionRegistry`], guarded by
//! a single mutex; the feed fan-out iterates a snapshot so removals during
//! iteration are safe.
//!
//! ## Lifecycle
//!
//! ```text
//! TCP accept     -> registered, no session id
//! SETUP          -> session id assigned, transport attached
//! PLAY           -> play flag set, RTCP SR armed
//! PAUSE          -> play flag cleared
//! TEARDOWN       -> removed, transports closed
//! write error    -> removed (by the fan-out)
//! 60 s idle      -> removed (by the sweep)
//! ```

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::media::TrackId;
use crate::transport::RtpTransport;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

// Process-wide monotonic session id counter, decimal, starting at 1.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Per-stream RTP delivery state.
///
/// Sequence numbers start at 1 and wrap mod 2^16; `packet_count` counts
/// data writes and `octet_count` payload bytes, both feeding the next
/// Sender Report.
#[derive(Debug)]
pub struct StreamState {
    pub sequence: u16,
    pub packet_count: u32,
    pub octet_count: u32,
    pub must_send_rtcp: bool,
    pub transport: Option<RtpTransport>,
    pub last_rtcp_received: Option<Instant>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            sequence: 1,
            packet_count: 0,
            octet_count: 0,
            must_send_rtcp: false,
            transport: None,
            last_rtcp_received: None,
        }
    }
}

/// Mutable connection state, guarded by the connection's mutex.
#[derive(Debug)]
pub struct ConnectionState {
    /// Empty until the first SETUP succeeds.
    pub session_id: String,
    pub play: bool,
    pub last_keepalive: Instant,
    /// Indexed by [`TrackId::index`]: video, audio.
    pub streams: [StreamState; 2],
}

/// One connected RTSP client.
pub struct Connection {
    peer_addr: SocketAddr,
    ssrc: u32,
    /// The RTSP socket, shared with any interleaved transports so RTSP
    /// responses and `$`-framed RTP never interleave mid-message.
    control: Arc<Mutex<TcpStream>>,
    state: Mutex<ConnectionState>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, ssrc: u32) -> Self {
        tracing::info!(%peer_addr, ssrc = format_args!("{ssrc:08X}"), "client connected");
        Self {
            peer_addr,
            ssrc,
            control: Arc::new(Mutex::new(stream)),
            state: Mutex::new(ConnectionState {
                session_id: String::new(),
                play: false,
                last_keepalive: Instant::now(),
                streams: [StreamState::default(), StreamState::default()],
            }),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// SSRC stamped into every packet sent to this client.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Shared handle to the RTSP socket, for interleaved transports.
    pub fn control_stream(&self) -> Arc<Mutex<TcpStream>> {
        self.control.clone()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock()
    }

    /// Refresh the keep-alive stamp. Called for every processed request.
    pub fn touch(&self) {
        self.state.lock().last_keepalive = Instant::now();
    }

    /// Record an inbound RTCP packet for a stream; also counts as liveness.
    pub fn record_rtcp(&self, track: TrackId) {
        let mut state = self.state.lock();
        state.last_keepalive = Instant::now();
        state.streams[track.index()].last_rtcp_received = Some(Instant::now());
    }

    /// Route an inbound interleaved frame by channel id: a frame on a
    /// stream's negotiated control channel is that stream's RTCP.
    pub fn note_interleaved(&self, channel: u8) {
        let mut state = self.state.lock();
        state.last_keepalive = Instant::now();
        for stream in state.streams.iter_mut() {
            if let Some(RtpTransport::Interleaved(tcp)) = stream.transport.as_ref() {
                if tcp.control_channel() == channel {
                    stream.last_rtcp_received = Some(Instant::now());
                    return;
                }
            }
        }
    }

    pub fn session_id(&self) -> String {
        self.state.lock().session_id.clone()
    }

    /// Session id for this connection, allocated from the process-wide
    /// counter on the first call (first successful SETUP).
    pub fn ensure_session_id(&self) -> String {
        let mut state = self.state.lock();
        if state.session_id.is_empty() {
            state.session_id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst).to_string();
            tracing::debug!(peer = %self.peer_addr, session_id = %state.session_id, "session id assigned");
        }
        state.session_id.clone()
    }

    /// Attach a transport to a stream, closing any previous one.
    pub fn attach_transport(&self, track: TrackId, transport: RtpTransport) {
        let mut state = self.state.lock();
        if let Some(old) = state.streams[track.index()].transport.replace(transport) {
            old.close();
        }
    }

    /// Toggle delivery. Entering PLAY arms a Sender Report on both streams.
    pub fn set_play(&self, play: bool) {
        let mut state = self.state.lock();
        state.play = play;
        if play {
            for stream in state.streams.iter_mut() {
                stream.must_send_rtcp = true;
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().play
    }

    /// Write a serialized RTSP response to the client.
    pub fn send_response(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self.control.lock();
        stream.write_all(bytes)
    }

    /// Close and drop both streams' transports. Idempotent.
    pub fn dispose_transports(&self) {
        let mut state = self.state.lock();
        state.play = false;
        for stream in state.streams.iter_mut() {
            if let Some(transport) = stream.transport.take() {
                transport.close();
            }
        }
    }

    /// Shut the RTSP socket down so the receive thread unblocks.
    pub fn shutdown(&self) {
        let _ = self.control.lock().shutdown(Shutdown::Both);
    }
}

/// Process-wide set of active client connections, guarded by one mutex.
pub struct ConnectionRegistry {
    connections: Mutex<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        let mut list = self.connections.lock();
        list.push(connection);
        tracing::debug!(total = list.len(), "connection registered");
    }

    /// Deregister a connection and close its RTP transports. Idempotent —
    /// the fan-out and the receive loop may both try to remove the same
    /// connection.
    pub fn remove(&self, connection: &Arc<Connection>) -> bool {
        let removed = {
            let mut list = self.connections.lock();
            match list.iter().position(|c| Arc::ptr_eq(c, connection)) {
                Some(pos) => {
                    list.swap_remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            connection.dispose_transports();
            tracing::info!(peer = %connection.peer_addr(), session_id = %connection.session_id(), "session removed");
        }
        removed
    }

    /// Resolve a session id to its connection. Empty ids never match.
    pub fn by_session_id(&self, id: &str) -> Option<Arc<Connection>> {
        if id.is_empty() {
            return None;
        }
        self.connections
            .lock()
            .iter()
            .find(|c| c.state().session_id == id)
            .cloned()
    }

    /// Copy of the current connection handles, for lock-free iteration.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    /// Remove connections idle longer than `max_idle`, then report
    /// `(total, playing)` for what's left.
    pub fn sweep_idle(&self, max_idle: Duration) -> (usize, usize) {
        let mut expired = Vec::new();
        let (total, playing) = {
            let mut list = self.connections.lock();
            list.retain(|c| {
                if c.state().last_keepalive.elapsed() > max_idle {
                    expired.push(c.clone());
                    false
                } else {
                    true
                }
            });
            let playing = list.iter().filter(|c| c.is_playing()).count();
            (list.len(), playing)
        };

        for connection in expired {
            tracing::info!(peer = %connection.peer_addr(), "session timed out");
            connection.dispose_transports();
            connection.shutdown();
        }

        (total, playing)
    }

    /// Take every connection out of the registry (server shutdown).
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        std::mem::take(&mut *self.connections.lock())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn make_connection() -> Arc<Connection> {
        // loopback socket pair so the connection has a real stream to own
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        drop(client);
        Arc::new(Connection::new(server_side, peer, 0x1234_5678))
    }

    #[test]
    fn session_ids_are_monotonic_decimal() {
        let a = make_connection();
        let b = make_connection();
        let id_a: u64 = a.ensure_session_id().parse().unwrap();
        let id_b: u64 = b.ensure_session_id().parse().unwrap();
        assert!(id_b > id_a);
        // second call must not reallocate
        assert_eq!(a.ensure_session_id(), id_a.to_string());
    }

    #[test]
    fn stream_state_defaults() {
        let state = StreamState::default();
        assert_eq!(state.sequence, 1);
        assert_eq!(state.packet_count, 0);
        assert_eq!(state.octet_count, 0);
        assert!(!state.must_send_rtcp);
        assert!(state.transport.is_none());
    }

    #[test]
    fn play_arms_rtcp_on_both_streams() {
        let conn = make_connection();
        conn.set_play(true);
        assert!(conn.is_playing());
        let state = conn.state();
        assert!(state.streams[0].must_send_rtcp);
        assert!(state.streams[1].must_send_rtcp);
    }

    #[test]
    fn registry_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection();
        registry.insert(conn.clone());

        assert!(registry.remove(&conn));
        assert!(!registry.remove(&conn));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn registry_resolves_session_ids() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection();
        registry.insert(conn.clone());

        assert!(registry.by_session_id("").is_none());
        let id = conn.ensure_session_id();
        let found = registry.by_session_id(&id).unwrap();
        assert!(Arc::ptr_eq(&found, &conn));

        registry.remove(&conn);
        assert!(registry.by_session_id(&id).is_none());
    }

    #[test]
    fn sweep_removes_idle_connections() {
        let registry = ConnectionRegistry::new();
        let idle = make_connection();
        let live = make_connection();
        let idle_id = idle.ensure_session_id();
        let live_id = live.ensure_session_id();
        live.set_play(true);
        registry.insert(idle.clone());
        registry.insert(live.clone());

        std::thread::sleep(Duration::from_millis(30));
        live.touch();

        let (total, playing) = registry.sweep_idle(Duration::from_millis(20));
        assert_eq!(total, 1);
        assert_eq!(playing, 1);
        assert!(registry.by_session_id(&idle_id).is_none());
        assert!(registry.by_session_id(&live_id).is_some());
    }
}

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::{Result, RtspError};
use crate::media::rtcp::{NtpTimestamp, SenderReport};
use crate::media::{Track, TrackId, rtp};
use crate::protocol::auth::{Authenticator, Credential};
use crate::session::ConnectionRegistry;
use crate::transport::tcp;

/// Server-level configuration. Construction only — loading it from a file
/// or the environment is the caller's business.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port` with an explicit non-zero port (e.g. `0.0.0.0:8554`).
    pub bind_addr: String,
    /// SDP session name (`s=`).
    pub session_name: String,
    /// When set, every request must authenticate.
    pub credentials: Option<Credential>,
    /// Challenge with Basic instead of Digest when credentials are set.
    pub basic_auth: bool,
    /// Authentication realm.
    pub realm: String,
    /// Base for per-connection SSRCs; random when `None`.
    pub ssrc_seed: Option<u32>,
    /// Session timeout advertised in the `Session` header and enforced by
    /// the keep-alive sweep (RFC 2326 §12.37).
    pub session_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8554".to_string(),
            session_name: "Stream".to_string(),
            credentials: None,
            basic_auth: false,
            realm: "rtsp-stream".to_string(),
            ssrc_seed: None,
            session_timeout_secs: crate::session::DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }
}

/// High-level RTSP server orchestrator.
///
/// Owns the connection registry, the attached tracks, and the accept
/// thread. Media enters through [`feed_video`](Self::feed_video) /
/// [`feed_audio`](Self::feed_audio) — called from any thread by whatever
/// paces the source — and fans out to every playing connection.
///
/// ```no_run
/// use std::sync::Arc;
/// use rtsp_stream::{H264Track, Server, ServerConfig};
///
/// let video = Arc::new(H264Track::new());
/// video.set_parameter_sets(&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce, 0x3c, 0x80]);
///
/// let mut server = Server::new(ServerConfig::default());
/// server.add_video_track(video).unwrap();
/// server.start_listen().unwrap();
///
/// // demuxer loop: one call per access unit
/// let idr = [0x65, 0x88, 0x80, 0x10];
/// server.feed_video(3000, &[&idr]);
/// ```
pub struct Server {
    inner: Arc<ServerInner>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let authenticator = config.credentials.clone().map(|credential| {
            if config.basic_auth {
                Authenticator::basic(credential, &config.realm)
            } else {
                Authenticator::digest(credential, &config.realm)
            }
        });
        let ssrc_seed = config
            .ssrc_seed
            .unwrap_or_else(|| rand::rng().random::<u32>());

        Self {
            inner: Arc::new(ServerInner {
                config,
                registry: ConnectionRegistry::new(),
                tracks: [RwLock::new(None), RwLock::new(None)],
                authenticator,
                running: AtomicBool::new(false),
                ssrc_seed,
                ssrc_counter: AtomicU32::new(0),
            }),
            accept_thread: None,
        }
    }

    /// Attach the video track. Must be called before
    /// [`start_listen`](Self::start_listen).
    pub fn add_video_track(&self, track: Arc<dyn Track>) -> Result<()> {
        self.inner.attach_track(TrackId::Video, track)
    }

    /// Attach the audio track. Must be called before
    /// [`start_listen`](Self::start_listen).
    pub fn add_audio_track(&self, track: Arc<dyn Track>) -> Result<()> {
        self.inner.attach_track(TrackId::Audio, track)
    }

    /// Bind the listener and spawn the accept thread.
    pub fn start_listen(&mut self) -> Result<()> {
        if self.inner.running() {
            return Err(RtspError::AlreadyRunning);
        }

        let addr: SocketAddr = self.inner.config.bind_addr.parse().map_err(|_| {
            RtspError::InvalidBindAddress(format!(
                "expected host:port with explicit port, got {:?}",
                self.inner.config.bind_addr
            ))
        })?;
        if addr.port() == 0 {
            return Err(RtspError::InvalidBindAddress(
                "port must be explicit (non-zero)".to_string(),
            ));
        }

        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        self.inner.running.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        tracing::info!(addr = %self.inner.config.bind_addr, "RTSP server listening");

        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, inner);
        }));

        Ok(())
    }

    /// Stop accepting, join the accept thread, and dispose every
    /// connection. Idempotent.
    pub fn stop_listen(&mut self) {
        if !self.inner.running() && self.accept_thread.is_none() {
            return;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        for connection in self.inner.registry.drain() {
            connection.dispose_transports();
            connection.shutdown();
        }
        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running()
    }

    /// Deliver one video access unit — its NAL units, bare, without Annex B
    /// start codes — to every playing connection. Never fails; transport
    /// errors remove the affected session and delivery continues.
    pub fn feed_video(&self, rtp_timestamp: u32, nal_units: &[&[u8]]) {
        self.inner.feed(TrackId::Video, rtp_timestamp, nal_units);
    }

    /// Deliver one audio access unit to every playing connection.
    pub fn feed_audio(&self, rtp_timestamp: u32, au: &[u8]) {
        self.inner.feed(TrackId::Audio, rtp_timestamp, &[au]);
    }

    /// Run the keep-alive sweep now and report `(total, playing)`
    /// connection counts after it.
    pub fn check_timeouts(&self) -> (usize, usize) {
        self.inner.registry.sweep_idle(self.inner.session_timeout())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop_listen();
    }
}

/// Shared server state: what the accept thread, the per-connection
/// handlers, and the feed entry points all see.
pub(crate) struct ServerInner {
    config: ServerConfig,
    registry: ConnectionRegistry,
    /// Indexed by [`TrackId::index`]: video, audio.
    tracks: [RwLock<Option<Arc<dyn Track>>>; 2],
    authenticator: Option<Authenticator>,
    running: AtomicBool,
    ssrc_seed: u32,
    ssrc_counter: AtomicU32,
}

impl ServerInner {
    pub(crate) fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub(crate) fn authenticator(&self) -> Option<&Authenticator> {
        self.authenticator.as_ref()
    }

    pub(crate) fn session_name(&self) -> &str {
        &self.config.session_name
    }

    pub(crate) fn session_timeout_secs(&self) -> u64 {
        self.config.session_timeout_secs
    }

    pub(crate) fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.config.session_timeout_secs)
    }

    pub(crate) fn track(&self, id: TrackId) -> Option<Arc<dyn Track>> {
        self.tracks[id.index()].read().clone()
    }

    /// SSRC for a new connection, derived from the seed so a configured
    /// seed gives a reproducible sequence.
    pub(crate) fn next_ssrc(&self) -> u32 {
        let n = self.ssrc_counter.fetch_add(1, Ordering::SeqCst);
        self.ssrc_seed.wrapping_add(n.wrapping_mul(2_654_435_761))
    }

    fn attach_track(&self, id: TrackId, track: Arc<dyn Track>) -> Result<()> {
        if self.running() {
            return Err(RtspError::TrackAfterStart);
        }
        if track.id() != id {
            return Err(RtspError::TrackSlotMismatch);
        }
        tracing::info!(?id, codec = track.codec_name(), "track attached");
        *self.tracks[id.index()].write() = Some(track);
        Ok(())
    }

    /// Packetize one access unit and fan it out. The producer-facing entry
    /// points never fail; anything that goes wrong is logged and absorbed.
    fn feed(&self, id: TrackId, timestamp: u32, units: &[&[u8]]) {
        if !self.running() {
            return;
        }
        let Some(track) = self.track(id) else {
            return;
        };
        if !track.is_ready() {
            return;
        }

        let mut packets = track.packetize(timestamp, units);
        if packets.is_empty() {
            return;
        }
        let payload_octets: u32 = units.iter().map(|u| u.len() as u32).sum();

        self.fan_out(id, timestamp, payload_octets, &mut packets);
        rtp::recycle(packets);
    }

    /// Deliver pre-built packets to every playing connection with a
    /// transport for this stream, stamping sequence/SSRC per connection.
    fn fan_out(&self, id: TrackId, timestamp: u32, payload_octets: u32, packets: &mut [Vec<u8>]) {
        // feed calls double as sweep ticks
        self.registry.sweep_idle(self.session_timeout());

        for connection in self.registry.snapshot() {
            let mut failed = false;
            {
                let mut state = connection.state();
                if !state.play {
                    continue;
                }
                let stream = &mut state.streams[id.index()];
                let Some(transport) = stream.transport.as_ref() else {
                    continue;
                };

                if stream.must_send_rtcp {
                    let report = SenderReport {
                        ssrc: connection.ssrc(),
                        ntp: NtpTimestamp::now(),
                        rtp_timestamp: timestamp,
                        packet_count: stream.packet_count,
                        octet_count: stream.octet_count,
                    };
                    match transport.write_control(&report.serialize()) {
                        Ok(()) => stream.must_send_rtcp = false,
                        Err(_) => failed = true,
                    }
                }

                if !failed {
                    for packet in packets.iter_mut() {
                        rtp::set_sequence(packet, stream.sequence);
                        rtp::set_ssrc(packet, connection.ssrc());
                        if transport.write_data(packet).is_err() {
                            failed = true;
                            break;
                        }
                        stream.sequence = stream.sequence.wrapping_add(1);
                        stream.packet_count = stream.packet_count.wrapping_add(1);
                    }
                    if !failed {
                        stream.octet_count = stream.octet_count.wrapping_add(payload_octets);
                    }
                }
            }

            if failed {
                tracing::warn!(peer = %connection.peer_addr(), "transport write failed, removing session");
                self.registry.remove(&connection);
                connection.shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h264::H264Track;

    #[test]
    fn start_rejects_port_zero() {
        let mut server = Server::new(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        });
        let err = server.start_listen().unwrap_err();
        match &err {
            RtspError::InvalidBindAddress(msg) => assert!(msg.contains("non-zero"), "{}", msg),
            _ => panic!("expected InvalidBindAddress, got {:?}", err),
        }
    }

    #[test]
    fn start_rejects_missing_port() {
        let mut server = Server::new(ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            ..ServerConfig::default()
        });
        assert!(matches!(
            server.start_listen(),
            Err(RtspError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn start_accepts_explicit_port() {
        let mut server = Server::new(ServerConfig {
            bind_addr: "127.0.0.1:18701".to_string(),
            ..ServerConfig::default()
        });
        server.start_listen().expect("explicit port should be accepted");
        assert!(server.is_running());
        server.stop_listen();
        assert!(!server.is_running());
    }

    #[test]
    fn tracks_rejected_after_start() {
        let mut server = Server::new(ServerConfig {
            bind_addr: "127.0.0.1:18702".to_string(),
            ..ServerConfig::default()
        });
        server.start_listen().unwrap();

        let err = server
            .add_video_track(Arc::new(H264Track::new()))
            .unwrap_err();
        assert!(matches!(err, RtspError::TrackAfterStart));
        server.stop_listen();
    }

    #[test]
    fn track_slot_must_match_track_id() {
        let server = Server::new(ServerConfig::default());
        let err = server
            .add_audio_track(Arc::new(H264Track::new()))
            .unwrap_err();
        assert!(matches!(err, RtspError::TrackSlotMismatch));
    }

    #[test]
    fn seeded_ssrcs_are_reproducible_and_distinct() {
        let make = || {
            Server::new(ServerConfig {
                ssrc_seed: Some(0x1000),
                ..ServerConfig::default()
            })
        };
        let a = make();
        let b = make();
        let a1 = a.inner.next_ssrc();
        let a2 = a.inner.next_ssrc();
        assert_ne!(a1, a2);
        assert_eq!(a1, b.inner.next_ssrc());
    }

    #[test]
    fn check_timeouts_on_idle_server() {
        let server = Server::new(ServerConfig::default());
        assert_eq!(server.check_timeouts(), (0, 0));
    }
}

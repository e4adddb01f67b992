use std::sync::Arc;

use crate::media::TrackId;
use crate::protocol::auth::AuthCheck;
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerInner;
use crate::session::Connection;
use crate::transport::{RtpTransport, TcpInterleaved, UdpPair};

/// Handles RTSP method requests for a single client connection.
///
/// Runs on the connection's receive thread; all session mutation happens
/// through the connection/registry locks.
pub struct MethodHandler {
    server: Arc<ServerInner>,
    connection: Arc<Connection>,
}

/// A handled request: the response to write, and whether the connection
/// should be closed afterwards (TEARDOWN, failed authentication).
pub struct HandlerOutcome {
    pub response: RtspResponse,
    pub end_connection: bool,
}

fn reply(response: RtspResponse) -> HandlerOutcome {
    HandlerOutcome {
        response,
        end_connection: false,
    }
}

impl MethodHandler {
    pub(crate) fn new(server: Arc<ServerInner>, connection: Arc<Connection>) -> Self {
        Self { server, connection }
    }

    pub fn handle(&self, request: &RtspRequest) -> HandlerOutcome {
        let cseq = request.cseq();

        // every processed request counts as keep-alive
        self.connection.touch();

        if let Some(auth) = self.server.authenticator() {
            match auth.check(request.method.name(), request.header("Authorization")) {
                AuthCheck::Granted => {}
                AuthCheck::Missing => {
                    return reply(
                        RtspResponse::unauthorized()
                            .add_header("CSeq", cseq)
                            .add_header("WWW-Authenticate", &auth.challenge()),
                    );
                }
                AuthCheck::Rejected => {
                    tracing::warn!(peer = %self.connection.peer_addr(), "authentication failed, closing connection");
                    return HandlerOutcome {
                        response: RtspResponse::unauthorized()
                            .add_header("CSeq", cseq)
                            .add_header("WWW-Authenticate", &auth.challenge()),
                        end_connection: true,
                    };
                }
            }
        }

        match &request.method {
            Method::Options => {
                tracing::debug!(%cseq, "OPTIONS");
                reply(RtspResponse::ok().add_header("CSeq", cseq))
            }
            Method::Describe => self.handle_describe(cseq, request),
            Method::Setup => self.handle_setup(cseq, request),
            Method::Play => self.handle_play(cseq, request),
            Method::Pause => self.handle_pause(cseq, request),
            Method::GetParameter => self.handle_get_parameter(cseq, request),
            Method::Teardown => self.handle_teardown(cseq, request),
            Method::Other(token) => {
                tracing::warn!(method = %token, %cseq, "unsupported RTSP method");
                reply(RtspResponse::not_implemented().add_header("CSeq", cseq))
            }
        }
    }

    fn handle_describe(&self, cseq: &str, request: &RtspRequest) -> HandlerOutcome {
        tracing::debug!(%cseq, uri = %request.uri, "DESCRIBE");

        let video = self.server.track(TrackId::Video);
        let audio = self.server.track(TrackId::Audio);

        let video_ready = video.as_ref().is_some_and(|t| t.is_ready());
        let audio_blocked = audio.as_ref().is_some_and(|t| !t.is_ready());
        if !video_ready || audio_blocked {
            tracing::warn!(video_ready, audio_blocked, "DESCRIBE before tracks are ready");
            return reply(RtspResponse::bad_request().add_header("CSeq", cseq));
        }

        let tracks: Vec<_> = video.into_iter().chain(audio).collect();
        let body = sdp::session_description(self.server.session_name(), &tracks);

        reply(
            RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Content-Base", &request.uri)
                .add_header("Content-Type", "application/sdp")
                .with_body(body),
        )
    }

    fn handle_setup(&self, cseq: &str, request: &RtspRequest) -> HandlerOutcome {
        let Some(header) = request.header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return reply(RtspResponse::bad_request().add_header("CSeq", cseq));
        };
        let Some(spec) = TransportSpec::parse(header) else {
            tracing::warn!(%cseq, header, "SETUP invalid Transport header");
            return reply(RtspResponse::bad_request().add_header("CSeq", cseq));
        };
        if spec.multicast {
            tracing::warn!(%cseq, "multicast SETUP refused");
            return reply(RtspResponse::unsupported_transport().add_header("CSeq", cseq));
        }

        let track = request
            .track_id()
            .filter(|id| self.server.track(*id).is_some());
        let ssrc = self.connection.ssrc();

        let (transport, transport_reply) = if spec.tcp {
            let (data_channel, control_channel) = spec.interleaved.unwrap_or_else(|| {
                let id = track.unwrap_or(TrackId::Video);
                (id.data_channel(), id.control_channel())
            });
            let interleaved = TcpInterleaved::new(
                self.connection.control_stream(),
                data_channel,
                control_channel,
            );
            (
                RtpTransport::Interleaved(interleaved),
                format!(
                    "RTP/AVP/TCP;unicast;interleaved={data_channel}-{control_channel};ssrc={ssrc:08X}"
                ),
            )
        } else {
            let Some((rtp_port, rtcp_port)) = spec.client_port else {
                tracing::warn!(%cseq, "UDP SETUP without client_port");
                return reply(RtspResponse::bad_request().add_header("CSeq", cseq));
            };
            let pair = match UdpPair::bind(self.connection.peer_addr().ip(), rtp_port, rtcp_port) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "UDP pair allocation failed");
                    return reply(
                        RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq),
                    );
                }
            };
            if let Some(track) = track {
                // inbound receiver reports count as liveness for the stream
                let weak = Arc::downgrade(&self.connection);
                pair.spawn_control_listener(move |packet| {
                    tracing::trace!(len = packet.len(), "RTCP from client");
                    if let Some(connection) = weak.upgrade() {
                        connection.record_rtcp(track);
                    }
                });
            }
            let transport_reply = format!(
                "RTP/AVP;unicast;client_port={rtp_port}-{rtcp_port};server_port={}-{};ssrc={ssrc:08X}",
                pair.data_port(),
                pair.control_port(),
            );
            (RtpTransport::Udp(pair), transport_reply)
        };

        let session_id = self.connection.ensure_session_id();

        match track {
            Some(track) => {
                self.connection.attach_transport(track, transport);
                tracing::info!(
                    session_id,
                    ?track,
                    uri = %request.uri,
                    transport = %transport_reply,
                    "stream set up"
                );
            }
            None => {
                tracing::warn!(uri = %request.uri, "SETUP for unknown track, nothing attached");
                transport.close();
            }
        }

        reply(
            RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header(
                    "Session",
                    &format!("{session_id};timeout={}", self.server.session_timeout_secs()),
                )
                .add_header("Transport", &transport_reply),
        )
    }

    fn handle_play(&self, cseq: &str, request: &RtspRequest) -> HandlerOutcome {
        let Some(session) = self.resolve_session(request) else {
            tracing::warn!(%cseq, "PLAY for unknown session");
            return reply(RtspResponse::session_not_found().add_header("CSeq", cseq));
        };

        session.set_play(true);
        tracing::info!(session_id = %session.session_id(), "session playing");

        // RFC 2326 §12.33: report only streams that were actually SETUP
        let rtp_info = {
            let state = session.state();
            state
                .streams
                .iter()
                .filter(|s| s.transport.is_some())
                .map(|s| format!("url={};seq={}", request.uri, s.sequence))
                .collect::<Vec<_>>()
                .join(",")
        };

        let mut response = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_id())
            .add_header("Range", "npt=0-");
        if !rtp_info.is_empty() {
            response = response.add_header("RTP-Info", &rtp_info);
        }
        reply(response)
    }

    fn handle_pause(&self, cseq: &str, request: &RtspRequest) -> HandlerOutcome {
        let Some(session) = self.resolve_session(request) else {
            tracing::warn!(%cseq, "PAUSE for unknown session");
            return reply(RtspResponse::session_not_found().add_header("CSeq", cseq));
        };

        session.set_play(false);
        tracing::info!(session_id = %session.session_id(), "session paused");

        reply(
            RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Session", &session.session_id()),
        )
    }

    /// GET_PARAMETER doubles as the client keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> HandlerOutcome {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        match request.session_id() {
            Some(_) => match self.resolve_session(request) {
                Some(session) => {
                    session.touch();
                    reply(
                        RtspResponse::ok()
                            .add_header("CSeq", cseq)
                            .add_header("Session", &session.session_id()),
                    )
                }
                None => reply(RtspResponse::session_not_found().add_header("CSeq", cseq)),
            },
            None => reply(RtspResponse::ok().add_header("CSeq", cseq)),
        }
    }

    fn handle_teardown(&self, cseq: &str, request: &RtspRequest) -> HandlerOutcome {
        let Some(session) = self.resolve_session(request) else {
            tracing::warn!(%cseq, "TEARDOWN for unknown session");
            return reply(RtspResponse::session_not_found().add_header("CSeq", cseq));
        };

        let session_id = session.session_id();
        self.server.registry().remove(&session);
        tracing::info!(%session_id, "session terminated via TEARDOWN");

        if Arc::ptr_eq(&session, &self.connection) {
            // the receive loop closes this connection after the response
            HandlerOutcome {
                response: RtspResponse::ok().add_header("CSeq", cseq),
                end_connection: true,
            }
        } else {
            session.shutdown();
            reply(RtspResponse::ok().add_header("CSeq", cseq))
        }
    }

    /// Resolve the request's Session header against the registry.
    fn resolve_session(&self, request: &RtspRequest) -> Option<Arc<Connection>> {
        self.server
            .registry()
            .by_session_id(request.session_id()?)
    }
}

/// The first transport choice from a SETUP `Transport:` header
/// (RFC 2326 §12.39).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSpec {
    /// `RTP/AVP/TCP` (interleaved) rather than plain UDP.
    pub tcp: bool,
    /// Multicast was requested (answered with 461).
    pub multicast: bool,
    /// `interleaved=a-b` channel ids.
    pub interleaved: Option<(u8, u8)>,
    /// `client_port=a-b` UDP ports.
    pub client_port: Option<(u16, u16)>,
}

impl TransportSpec {
    /// Parse the first (preferred) transport spec of the header.
    pub fn parse(header: &str) -> Option<Self> {
        let first = header.split(',').next()?.trim();
        if first.is_empty() {
            return None;
        }

        let mut spec = TransportSpec {
            tcp: false,
            multicast: false,
            interleaved: None,
            client_port: None,
        };

        for (i, part) in first.split(';').enumerate() {
            let part = part.trim();
            if i == 0 {
                spec.tcp = part.eq_ignore_ascii_case("RTP/AVP/TCP");
                continue;
            }
            if part.eq_ignore_ascii_case("multicast") {
                spec.multicast = true;
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                spec.interleaved =
                    parse_port_pair(channels).map(|(a, b)| (a as u8, b as u8));
                spec.tcp = true;
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                spec.client_port = parse_port_pair(ports);
            }
        }

        Some(spec)
    }
}

/// Parse `a-b`; a lone `a` pairs with `a+1`.
fn parse_port_pair(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: u16 = value.trim().parse().ok()?;
            Some((a, a + 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp_interleaved() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert!(spec.tcp);
        assert!(!spec.multicast);
        assert_eq!(spec.interleaved, Some((0, 1)));
        assert_eq!(spec.client_port, None);
    }

    #[test]
    fn parse_udp_unicast() {
        let spec = TransportSpec::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
        assert!(!spec.tcp);
        assert_eq!(spec.client_port, Some((8000, 8001)));
    }

    #[test]
    fn parse_multicast() {
        let spec = TransportSpec::parse("RTP/AVP;multicast;port=3456-3457").unwrap();
        assert!(spec.multicast);
    }

    #[test]
    fn parse_takes_first_choice() {
        let spec =
            TransportSpec::parse("RTP/AVP/TCP;interleaved=2-3,RTP/AVP;client_port=8000-8001")
                .unwrap();
        assert!(spec.tcp);
        assert_eq!(spec.interleaved, Some((2, 3)));
        assert_eq!(spec.client_port, None);
    }

    #[test]
    fn parse_single_channel_expands_to_pair() {
        let spec = TransportSpec::parse("RTP/AVP/TCP;unicast;interleaved=4").unwrap();
        assert_eq!(spec.interleaved, Some((4, 5)));
    }

    #[test]
    fn parse_empty_header() {
        assert!(TransportSpec::parse("").is_none());
    }
}

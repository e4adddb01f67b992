//! # rtsp-stream — RTSP server core for live media streaming
//!
//! A Rust library for serving pre-encoded H.264/H.265 video and AAC audio
//! to RTSP clients over RTP, with interleaved-TCP and UDP delivery.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation, interleaved framing |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet header format, SSRC semantics, Sender Reports |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566) | SDP | Session description generation for DESCRIBE responses |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | Single NAL unit mode, FU-A fragmentation, sprop SDP attributes |
//! | [RFC 7798](https://tools.ietf.org/html/rfc7798) | H.265 RTP payload | Single NAL unit mode, FU fragmentation |
//! | [RFC 3640](https://tools.ietf.org/html/rfc3640) | AAC RTP payload | AAC-hbr AU headers, MPEG4-GENERIC SDP attributes |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | HTTP authentication | Digest (MD5) and Basic challenges |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  Producer (demuxer + pacing timer)        │  external
//! ├───────────────────────────────────────────┤
//! │  Server     — feed API, fan-out, config   │
//! ├───────────────────────────────────────────┤
//! │  Protocol   — RTSP parsing, dialog, auth  │
//! │  Session    — connections, registry, sweep│
//! ├───────────────────────────────────────────┤
//! │  Transport  — TCP interleaved, UDP pairs  │
//! │  Media      — tracks, packetizers, RTCP   │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtsp_stream::{H264Track, Server, ServerConfig};
//!
//! let video = Arc::new(H264Track::new());
//! video.set_parameter_sets(&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce, 0x3c, 0x80]);
//!
//! let mut server = Server::new(ServerConfig::default());
//! server.add_video_track(video).unwrap();
//! server.start_listen().unwrap();
//!
//! // The demuxer pushes timestamped access units; the server packetizes
//! // and delivers them to every client currently in PLAY.
//! let idr = [0x65, 0x88, 0x80, 0x10];
//! server.feed_video(3000, &[&idr]);
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator, [`ServerConfig`], feed fan-out.
//! - [`session`] — Per-client connection state and the session registry.
//! - [`protocol`] — RTSP request/response parsing, method dispatch, SDP, authentication.
//! - [`transport`] — Interleaved TCP channels and UDP socket pairs.
//! - [`media`] — [`Track`] capability, codec packetizers, RTP/RTCP wire formats.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use error::{Result, RtspError};
pub use media::aac::AacTrack;
pub use media::h264::H264Track;
pub use media::h265::H265Track;
pub use media::{Track, TrackId};
pub use protocol::auth::Credential;
pub use server::{Server, ServerConfig};

//! SDP session description assembly (RFC 4566) for DESCRIBE responses.
//!
//! ```text
//! v=0                            ← protocol version
//! o=user 123 0 IN IP4 0.0.0.0   ← origin
//! s=<session-name>               ← session name
//! c=IN IP4 0.0.0.0               ← connection address (per-track ports
//!                                  come from SETUP, not SDP)
//! m=video 0 RTP/AVP 96           ← first track's media section
//! ...
//! ```
//!
//! Media sections are produced by the tracks themselves
//! ([`Track::sdp_media`]); this module only assembles the session-level
//! preamble. Lines end with LF.

use std::sync::Arc;

use crate::media::Track;

/// Build the full session description for the given tracks (video first).
pub fn session_description(session_name: &str, tracks: &[Arc<dyn Track>]) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\n");
    sdp.push_str("o=user 123 0 IN IP4 0.0.0.0\n");
    sdp.push_str(&format!("s={session_name}\n"));
    sdp.push_str("c=IN IP4 0.0.0.0\n");

    for track in tracks {
        if let Some(media) = track.sdp_media() {
            sdp.push_str(&media);
        }
    }

    tracing::debug!(sdp_len = sdp.len(), tracks = tracks.len(), "session description built");
    sdp
}

//! Media layer: track abstraction, RTP/RTCP wire formats, codec packetizers.
//!
//! A [`Track`] turns access units into ready-to-send RTP packets and
//! contributes its media section to the DESCRIBE session description.
//! Packets leave the packetizers with zeroed sequence number and SSRC;
//! both are stamped per connection at send time (see
//! [`rtp::set_sequence`] / [`rtp::set_ssrc`]).

pub mod aac;
pub mod h264;
pub mod h265;
pub mod rtcp;
pub mod rtp;

/// Assumed link MTU for outbound RTP.
pub const LINK_MTU: usize = 1400;

/// RTP payload bytes available per packet before fragmentation kicks in:
/// link MTU minus IPv4 (20), UDP (8) and RTP header allowance (16).
pub const MTU_PAYLOAD: usize = LINK_MTU - (20 + 8 + 16);

/// Identity of a media track. The server is a two-track device: one video
/// slot and one audio slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackId {
    Video = 0,
    Audio = 1,
}

impl TrackId {
    /// Slot index into per-connection stream state.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Dynamic RTP payload type, 96 + track id (RFC 3551 dynamic range).
    pub fn payload_type(self) -> u8 {
        96 + self as u8
    }

    /// Default interleaved data channel (RFC 2326 §10.12): 0 for video, 2 for audio.
    pub fn data_channel(self) -> u8 {
        (self as u8) * 2
    }

    /// Default interleaved control channel: data channel + 1.
    pub fn control_channel(self) -> u8 {
        self.data_channel() + 1
    }

    /// The `a=control:` URI suffix clients use to address this track in SETUP.
    pub fn control_tag(self) -> String {
        format!("trackID={}", self as u8)
    }
}

/// Uniform capability a codec track exposes to the session engine.
///
/// Implementations: [`h264::H264Track`], [`h265::H265Track`],
/// [`aac::AacTrack`]. All are shared across connections behind an `Arc`,
/// so parameter-set state uses interior mutability.
pub trait Track: Send + Sync {
    /// Which slot this track occupies.
    fn id(&self) -> TrackId;

    /// Codec name for the SDP rtpmap attribute (e.g. "H264", "H265").
    fn codec_name(&self) -> &'static str;

    /// RTP payload type number.
    fn payload_type(&self) -> u8 {
        self.id().payload_type()
    }

    /// RTP clock rate in Hz (90000 for video, the sample rate for AAC).
    fn clock_rate(&self) -> u32;

    /// Whether the track can be described. Video tracks become ready once
    /// their parameter sets are supplied; DESCRIBE fails with 400 while any
    /// attached track reports `false`.
    fn is_ready(&self) -> bool;

    /// SDP media section for this track (`m=`, `a=control`, `a=rtpmap`,
    /// `a=fmtp`, LF line endings). `None` until the track is ready.
    fn sdp_media(&self) -> Option<String>;

    /// Packetize the units of one access unit into RTP packets.
    ///
    /// For video, `units` are the bare NAL units of the frame (no Annex B
    /// start codes); for audio, a single AU. Sequence number and SSRC in
    /// the returned packets are zero; the marker bit is set on the last
    /// packet of the access unit.
    fn packetize(&self, timestamp: u32, units: &[&[u8]]) -> Vec<Vec<u8>>;
}

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;

use super::{MTU_PAYLOAD, Track, TrackId, rtp};

/// FU-A fragmentation unit NAL type (RFC 6184 §5.8).
const FU_A: u8 = 28;

/// H.264 video track (RFC 6184).
///
/// Packetizes bare NAL units (no Annex B start codes) using single NAL
/// unit mode, falling back to FU-A fragmentation for NALs exceeding the
/// MTU payload budget. Not ready until SPS and PPS have been supplied;
/// both are advertised base64-encoded in the SDP `sprop-parameter-sets`.
#[derive(Debug, Default)]
pub struct H264Track {
    parameter_sets: RwLock<Option<ParameterSets>>,
}

#[derive(Debug, Clone)]
struct ParameterSets {
    sps: Vec<u8>,
    pps: Vec<u8>,
}

impl H264Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the out-of-band SPS and PPS. Must happen before the track is
    /// described; changing them afterwards serves stale SDP to already
    /// described clients but is otherwise harmless.
    pub fn set_parameter_sets(&self, sps: &[u8], pps: &[u8]) {
        tracing::debug!(sps_len = sps.len(), pps_len = pps.len(), "H264 parameter sets updated");
        *self.parameter_sets.write() = Some(ParameterSets {
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        });
    }

    /// Packetize one NAL: single packet if it fits, FU-A otherwise.
    fn packetize_nal(&self, packets: &mut Vec<Vec<u8>>, timestamp: u32, nal: &[u8], last_in_au: bool) {
        let pt = self.payload_type();

        if nal.len() <= MTU_PAYLOAD {
            let mut packet = rtp::begin_packet(last_in_au, pt, timestamp);
            packet.extend_from_slice(nal);
            packets.push(packet);
            return;
        }

        let indicator = (nal[0] & 0xe0) | FU_A;
        let nal_type = nal[0] & 0x1f;
        let body = &nal[1..];
        let fragments = body.len().div_ceil(MTU_PAYLOAD);

        for (i, chunk) in body.chunks(MTU_PAYLOAD).enumerate() {
            let start = i == 0;
            let end = i == fragments - 1;

            let mut packet = rtp::begin_packet(last_in_au && end, pt, timestamp);
            packet.push(indicator);
            packet.push(((start as u8) << 7) | ((end as u8) << 6) | nal_type);
            packet.extend_from_slice(chunk);
            packets.push(packet);
        }

        tracing::trace!(nal_type, nal_len = nal.len(), fragments, "FU-A fragmented NAL unit");
    }
}

impl Track for H264Track {
    fn id(&self) -> TrackId {
        TrackId::Video
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    fn clock_rate(&self) -> u32 {
        90_000
    }

    fn is_ready(&self) -> bool {
        self.parameter_sets.read().is_some()
    }

    fn sdp_media(&self) -> Option<String> {
        let params = self.parameter_sets.read().clone()?;
        let pt = self.payload_type();
        Some(format!(
            "m=video 0 RTP/AVP {pt}\n\
             a=control:{}\n\
             a=rtpmap:{pt} {}/{}\n\
             a=fmtp:{pt} packetization-mode=1;sprop-parameter-sets={},{}\n",
            self.id().control_tag(),
            self.codec_name(),
            self.clock_rate(),
            BASE64.encode(&params.sps),
            BASE64.encode(&params.pps),
        ))
    }

    fn packetize(&self, timestamp: u32, units: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        for (i, nal) in units.iter().enumerate() {
            if nal.is_empty() {
                continue;
            }
            self.packetize_nal(&mut packets, timestamp, nal, i == units.len() - 1);
        }
        packets
    }
}

//! H.265 (HEVC) RTP packetization — RFC 7798.
//!
//! Differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**; the NAL type sits in bits 9..15 of the
//!   big-endian header word.
//! - **FU payload**: a 2-byte payload header carrying type 49 with the
//!   original layer-id/TID bits, then a one-byte FU header with S/E flags
//!   and the original 6-bit NAL type.
//! - **SDP** (RFC 7798 §7.1): `sprop-vps` / `sprop-sps` / `sprop-pps`
//!   instead of `sprop-parameter-sets`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::RwLock;

use super::{MTU_PAYLOAD, Track, TrackId, rtp};

/// HEVC fragmentation unit NAL type (RFC 7798 §4.4.3).
const FU: u16 = 49;

/// H.265 video track (RFC 7798).
///
/// Not ready until VPS, SPS and PPS have been supplied.
#[derive(Debug, Default)]
pub struct H265Track {
    parameter_sets: RwLock<Option<ParameterSets>>,
}

#[derive(Debug, Clone)]
struct ParameterSets {
    vps: Vec<u8>,
    sps: Vec<u8>,
    pps: Vec<u8>,
}

impl H265Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply the out-of-band VPS, SPS and PPS.
    pub fn set_parameter_sets(&self, vps: &[u8], sps: &[u8], pps: &[u8]) {
        tracing::debug!(
            vps_len = vps.len(),
            sps_len = sps.len(),
            pps_len = pps.len(),
            "H265 parameter sets updated"
        );
        *self.parameter_sets.write() = Some(ParameterSets {
            vps: vps.to_vec(),
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        });
    }

    fn packetize_nal(&self, packets: &mut Vec<Vec<u8>>, timestamp: u32, nal: &[u8], last_in_au: bool) {
        let pt = self.payload_type();

        if nal.len() <= MTU_PAYLOAD {
            let mut packet = rtp::begin_packet(last_in_au, pt, timestamp);
            packet.extend_from_slice(nal);
            packets.push(packet);
            return;
        }

        let nal_header = u16::from_be_bytes([nal[0], nal[1]]);
        // keep F bit and layer-id/TID, replace the type field with FU
        let payload_header = (nal_header & 0x81ff) | (FU << 9);
        let nal_type = ((nal_header >> 9) & 0x3f) as u8;
        let body = &nal[2..];
        let fragments = body.len().div_ceil(MTU_PAYLOAD);

        for (i, chunk) in body.chunks(MTU_PAYLOAD).enumerate() {
            let start = i == 0;
            let end = i == fragments - 1;

            let mut packet = rtp::begin_packet(last_in_au && end, pt, timestamp);
            packet.extend_from_slice(&payload_header.to_be_bytes());
            packet.push(((start as u8) << 7) | ((end as u8) << 6) | nal_type);
            packet.extend_from_slice(chunk);
            packets.push(packet);
        }

        tracing::trace!(nal_type, nal_len = nal.len(), fragments, "HEVC fragmented NAL unit");
    }
}

impl Track for H265Track {
    fn id(&self) -> TrackId {
        TrackId::Video
    }

    fn codec_name(&self) -> &'static str {
        "H265"
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
             a=fmtp:{pt} sprop-vps={};sprop-sps={};sprop-pps={}\n",
            self.id().control_tag(),
            self.codec_name(),
            self.clock_rate(),
            BASE64.encode(&params.vps),
            BASE64.encode(&params.sps),
            BASE64.encode(&params.pps),
        ))
    }

    fn packetize(&self, timestamp: u32, units: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        for (i, nal) in units.iter().enumerate() {
            // the shortest legal HEVC NAL is its 2-byte header
            if nal.len() < 2 {
                continue;
            }
            self.packetize_nal(&mut packets, timestamp, nal, i == units.len() - 1);
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RTP_HEADER_LEN;

    // IDR_W_RADL (type 19) NAL header: type in bits 9..15 of the word.
    const IDR_HEADER: [u8; 2] = [19 << 1, 0x01];

    #[test]
    fn not_ready_without_parameter_sets() {
        let track = H265Track::new();
        assert!(!track.is_ready());

        track.set_parameter_sets(&[0x40, 0x01], &[0x42, 0x01], &[0x44, 0x01]);
        assert!(track.is_ready());
    }

    #[test]
    fn sdp_media_section() {
        let track = H265Track::new();
        track.set_parameter_sets(&[0x40, 0x01], &[0x42, 0x01], &[0x44, 0x01]);

        let sdp = track.sdp_media().unwrap();
        assert!(sdp.contains("m=video 0 RTP/AVP 96\n"));
        assert!(sdp.contains("a=control:trackID=0\n"));
        assert!(sdp.contains("a=rtpmap:96 H265/90000\n"));
        assert!(sdp.contains(&format!("sprop-vps={}", BASE64.encode([0x40, 0x01]))));
        assert!(sdp.contains(&format!("sprop-sps={}", BASE64.encode([0x42, 0x01]))));
        assert!(sdp.contains(&format!("sprop-pps={}", BASE64.encode([0x44, 0x01]))));
    }

    #[test]
    fn small_nal_single_packet() {
        let track = H265Track::new();
        let mut nal = IDR_HEADER.to_vec();
        nal.extend_from_slice(&[0xaa, 0xbb]);
        let packets = track.packetize(900, &[&nal[..]]);

        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][RTP_HEADER_LEN..], &nal[..]);
        assert!(rtp::marker(&packets[0]));
    }

    #[test]
    fn large_nal_fragments_with_hevc_fu() {
        let track = H265Track::new();
        let mut nal = IDR_HEADER.to_vec();
        nal.extend(vec![0xcd; 2 * MTU_PAYLOAD + 100]);
        let packets = track.packetize(0, &[&nal[..]]);

        assert_eq!(packets.len(), 3);

        let first = &packets[0][RTP_HEADER_LEN..];
        let payload_header = u16::from_be_bytes([first[0], first[1]]);
        assert_eq!((payload_header >> 9) & 0x3f, FU, "payload header carries type 49");
        assert_eq!(payload_header & 0x01ff, 0x0001, "layer-id/TID preserved");
        assert_eq!(first[2], 0x80 | 19, "start bit + original type");

        let middle = &packets[1][RTP_HEADER_LEN..];
        assert_eq!(middle[2], 19, "no S/E on middle fragment");

        let last = &packets[2][RTP_HEADER_LEN..];
        assert_eq!(last[2], 0x40 | 19, "end bit + original type");
        assert!(rtp::marker(&packets[2]));
        assert!(!rtp::marker(&packets[0]));
        assert!(!rtp::marker(&packets[1]));
    }

    #[test]
    fn runt_nal_is_skipped() {
        let track = H265Track::new();
        assert!(track.packetize(0, &[&[0x40][..]]).is_empty());
    }
}

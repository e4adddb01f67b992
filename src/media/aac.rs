//! AAC RTP packetization — RFC 3640, AAC-hbr mode.
//!
//! One RTP packet per access unit. The payload starts with a 4-byte
//! prefix: a 16-bit AU-headers-length field (always 16, i.e. one AU
//! header) followed by the AU header itself, `size << 3 | index`, with
//! `sizeLength=13`, `indexLength=3`, `index=0`.

use std::fmt::Write as _;

use parking_lot::RwLock;

use super::{Track, TrackId, rtp};

/// AU-headers-length in bits: exactly one 16-bit AU header per packet.
const AU_HEADERS_LENGTH_BITS: u16 = 16;

/// Largest AU the 13-bit size field can describe.
const MAX_AU_LEN: usize = (1 << 13) - 1;

/// AAC audio track (RFC 3640, `MPEG4-GENERIC` / AAC-hbr).
///
/// Ready once an AudioSpecificConfig has been supplied; the config is
/// advertised hex-encoded in the SDP `config=` parameter.
#[derive(Debug)]
pub struct AacTrack {
    sample_rate: u32,
    channels: u8,
    config: RwLock<Vec<u8>>,
}

impl AacTrack {
    pub fn new(sample_rate: u32, channels: u8, audio_specific_config: &[u8]) -> Self {
        Self {
            sample_rate,
            channels,
            config: RwLock::new(audio_specific_config.to_vec()),
        }
    }

    /// Replace the AudioSpecificConfig advertised in SDP.
    pub fn set_audio_specific_config(&self, config: &[u8]) {
        tracing::debug!(config_len = config.len(), "AAC AudioSpecificConfig updated");
        *self.config.write() = config.to_vec();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }
}

impl Track for AacTrack {
    fn id(&self) -> TrackId {
        TrackId::Audio
    }

    fn codec_name(&self) -> &'static str {
        "MPEG4-GENERIC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_ready(&self) -> bool {
        !self.config.read().is_empty()
    }

    fn sdp_media(&self) -> Option<String> {
        let config = self.config.read();
        if config.is_empty() {
            return None;
        }
        let config_hex = config.iter().fold(String::new(), |mut acc, byte| {
            let _ = write!(acc, "{byte:02X}");
            acc
        });
        let pt = self.payload_type();
        Some(format!(
            "m=audio 0 RTP/AVP {pt}\n\
             a=control:{}\n\
             a=rtpmap:{pt} {}/{}/{}\n\
             a=fmtp:{pt} profile-level-id=1;mode=AAC-hbr;config={config_hex};\
             sizeLength=13;indexLength=3;indexDeltaLength=3\n",
            self.id().control_tag(),
            self.codec_name(),
            self.clock_rate(),
            self.channels,
        ))
    }

    fn packetize(&self, timestamp: u32, units: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        for au in units {
            if au.is_empty() {
                continue;
            }
            if au.len() > MAX_AU_LEN {
                tracing::warn!(au_len = au.len(), "AU exceeds 13-bit size field, dropped");
                continue;
            }

            let mut packet = rtp::begin_packet(true, self.payload_type(), timestamp);
            packet.extend_from_slice(&AU_HEADERS_LENGTH_BITS.to_be_bytes());
            packet.extend_from_slice(&((au.len() as u16) << 3).to_be_bytes());
            packet.extend_from_slice(au);
            packets.push(packet);
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RTP_HEADER_LEN;

    // AAC-LC, 48 kHz, stereo
    const ASC: [u8; 2] = [0x11, 0x90];

    #[test]
    fn ready_once_config_present() {
        let track = AacTrack::new(48_000, 2, &[]);
        assert!(!track.is_ready());
        assert!(track.sdp_media().is_none());

        track.set_audio_specific_config(&ASC);
        assert!(track.is_ready());
    }

    #[test]
    fn sdp_media_section() {
        let track = AacTrack::new(48_000, 2, &ASC);
        let sdp = track.sdp_media().unwrap();

        assert!(sdp.contains("m=audio 0 RTP/AVP 97\n"));
        assert!(sdp.contains("a=control:trackID=1\n"));
        assert!(sdp.contains("a=rtpmap:97 MPEG4-GENERIC/48000/2\n"));
        assert!(sdp.contains("mode=AAC-hbr"));
        assert!(sdp.contains("config=1190"));
        assert!(sdp.contains("sizeLength=13;indexLength=3;indexDeltaLength=3"));
    }

    #[test]
    fn au_header_prefix() {
        let track = AacTrack::new(48_000, 2, &ASC);
        let au = [0x21, 0x1b, 0xc0, 0x00, 0x55];
        let packets = track.packetize(1024, &[&au]);

        assert_eq!(packets.len(), 1);
        let payload = &packets[0][RTP_HEADER_LEN..];
        // AU-headers-length = 16 bits
        assert_eq!(&payload[..2], &[0x00, 0x10]);
        // AU header = size << 3, index 0
        assert_eq!(u16::from_be_bytes([payload[2], payload[3]]), (au.len() as u16) << 3);
        assert_eq!(&payload[4..], &au);
        assert!(rtp::marker(&packets[0]));
        assert_eq!(rtp::payload_type(&packets[0]), 97);
    }

    #[test]
    fn oversized_au_dropped() {
        let track = AacTrack::new(48_000, 2, &ASC);
        let au = vec![0u8; MAX_AU_LEN + 1];
        assert!(track.packetize(0, &[&au[..]]).is_empty());
    }
}

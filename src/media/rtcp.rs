//! RTCP Sender Report wire format (RFC 3550 §6.4.1).
//!
//! Only Sender Reports are originated: 28 bytes, zero report blocks. One is
//! emitted on the control path of each stream right after PLAY, binding the
//! stream's RTP timestamp to wall-clock (NTP) time and carrying the packet
//! and octet counters accumulated so far.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Serialized length of a Sender Report with no report blocks.
pub const SENDER_REPORT_LEN: usize = 28;

/// Seconds between the NTP epoch (1900-01-01) and the UNIX epoch (1970-01-01).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP timestamp: seconds since 1900-01-01 00:00:00 UTC plus a
/// 32-bit binary fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Current system time as an NTP timestamp.
    pub fn now() -> Self {
        let since_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration_since_unix_epoch(since_unix)
    }

    /// Convert a duration since the UNIX epoch to NTP form.
    pub fn from_duration_since_unix_epoch(duration: Duration) -> Self {
        let seconds = duration.as_secs() + NTP_UNIX_OFFSET;
        // fraction = nanos * 2^32 / 10^9
        let fraction = ((duration.subsec_nanos() as u64 * 0x1_0000_0000) / 1_000_000_000) as u32;
        Self {
            seconds: seconds as u32,
            fraction,
        }
    }
}

/// RTCP Sender Report with zero report blocks.
#[derive(Debug, Clone, Copy)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp: NtpTimestamp,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    /// Serialize to the 28-byte wire form, all fields big-endian.
    ///
    /// Header: V=2, P=0, RC=0, PT=200, length = word count - 1 = 6.
    pub fn serialize(&self) -> [u8; SENDER_REPORT_LEN] {
        let mut buf = [0u8; SENDER_REPORT_LEN];
        buf[0] = 2 << 6;
        buf[1] = 200;
        buf[2..4].copy_from_slice(&6u16.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ntp.seconds.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ntp.fraction.to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_report() -> SenderReport {
        SenderReport {
            ssrc: 0x11223344,
            ntp: NtpTimestamp {
                seconds: 0xAABBCCDD,
                fraction: 0x80000000,
            },
            rtp_timestamp: 90_000,
            packet_count: 42,
            octet_count: 12_345,
        }
    }

    #[test]
    fn header_fields() {
        let buf = make_report().serialize();
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[0] & 0x1f, 0, "report count must be zero");
        assert_eq!(buf[1], 200, "payload type must be SR");
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 6);
    }

    #[test]
    fn body_fields_big_endian() {
        let buf = make_report().serialize();
        assert_eq!(&buf[4..8], &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&buf[12..16], &[0x80, 0x00, 0x00, 0x00]);
        assert_eq!(u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]), 90_000);
        assert_eq!(u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]), 42);
        assert_eq!(u32::from_be_bytes([buf[24], buf[25], buf[26], buf[27]]), 12_345);
    }

    #[test]
    fn ntp_fraction_is_binary() {
        // 0.5 s must map to the top bit of the fraction word.
        let ts = NtpTimestamp::from_duration_since_unix_epoch(Duration::new(0, 500_000_000));
        assert_eq!(ts.seconds as u64, NTP_UNIX_OFFSET);
        assert_eq!(ts.fraction, 0x80000000);
    }

    #[test]
    fn ntp_now_is_after_2020() {
        // Jan 1, 2020 in NTP time.
        assert!(NtpTimestamp::now().seconds > 3_786_825_600);
    }
}

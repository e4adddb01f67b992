//! RTP delivery transports.
//!
//! A transport presents one duplex contract to the fan-out: a data-port
//! write, a control-port write, and (for UDP) a control-receive thread that
//! reports inbound RTCP. Two concrete variants:
//!
//! - [`TcpInterleaved`] — `$`-framed channels multiplexed on the RTSP
//!   socket (RFC 2326 §10.12).
//! - [`UdpPair`] — two sockets on adjacent ports in [50000, 51000],
//!   addressing the client's `client_port` pair.
//!
//! Multicast is negotiated away at SETUP time (461), so no variant exists
//! for it.

pub mod tcp;
pub mod udp;

use std::io;

pub use tcp::TcpInterleaved;
pub use udp::UdpPair;

/// A stream's attached delivery transport.
#[derive(Debug)]
pub enum RtpTransport {
    Interleaved(TcpInterleaved),
    Udp(UdpPair),
}

impl RtpTransport {
    /// Send an RTP packet on the data path.
    pub fn write_data(&self, packet: &[u8]) -> io::Result<()> {
        match self {
            Self::Interleaved(t) => t.write_data(packet),
            Self::Udp(t) => t.write_data(packet),
        }
    }

    /// Send an RTCP packet on the control path.
    pub fn write_control(&self, packet: &[u8]) -> io::Result<()> {
        match self {
            Self::Interleaved(t) => t.write_control(packet),
            Self::Udp(t) => t.write_control(packet),
        }
    }

    /// Release transport resources. The interleaved variant borrows the
    /// RTSP socket, which the connection itself owns; the UDP variant stops
    /// its control-receive thread and drops its sockets.
    pub fn close(&self) {
        match self {
            Self::Interleaved(_) => {}
            Self::Udp(t) => t.close(),
        }
    }
}

//! UDP socket pair for plain RTP/RTCP delivery.
//!
//! SETUP with `RTP/AVP;unicast;client_port=a-b` allocates two sockets on
//! adjacent ports — even for RTP, odd for RTCP, per RFC 3550 §11 — scanned
//! from the [50000, 51000] range. The client's RTCP (receiver reports)
//! arrives on the control socket and is surfaced through a callback on a
//! reader thread the pair owns.

use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Result, RtspError};

/// First data port tried when allocating a pair.
pub const UDP_PORT_MIN: u16 = 50_000;
/// Upper bound of the allocation range.
pub const UDP_PORT_MAX: u16 = 51_000;

// Reader threads poll this often for shutdown.
const CONTROL_POLL: Duration = Duration::from_millis(500);

/// A bound (RTP, RTCP) socket pair addressing one client.
#[derive(Debug)]
pub struct UdpPair {
    data: Arc<UdpSocket>,
    control: Arc<UdpSocket>,
    peer_data: SocketAddr,
    peer_control: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl UdpPair {
    /// Bind a fresh pair and point it at the client's `client_port` pair.
    ///
    /// Walks even ports from 50000 until both the even and the adjacent odd
    /// port bind; errors with [`RtspError::PortRangeExhausted`] past 51000.
    pub fn bind(peer_ip: IpAddr, peer_data_port: u16, peer_control_port: u16) -> Result<Self> {
        let mut port = UDP_PORT_MIN;
        while port < UDP_PORT_MAX {
            if let (Ok(data), Ok(control)) = (
                UdpSocket::bind(("0.0.0.0", port)),
                UdpSocket::bind(("0.0.0.0", port + 1)),
            ) {
                tracing::debug!(
                    data_port = port,
                    control_port = port + 1,
                    peer = %peer_ip,
                    "UDP pair bound"
                );
                return Ok(Self {
                    data: Arc::new(data),
                    control: Arc::new(control),
                    peer_data: SocketAddr::new(peer_ip, peer_data_port),
                    peer_control: SocketAddr::new(peer_ip, peer_control_port),
                    closed: Arc::new(AtomicBool::new(false)),
                });
            }
            port += 2;
        }
        Err(RtspError::PortRangeExhausted)
    }

    /// Local RTP port (advertised as the first half of `server_port`).
    pub fn data_port(&self) -> u16 {
        self.data.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Local RTCP port (second half of `server_port`).
    pub fn control_port(&self) -> u16 {
        self.control.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn write_data(&self, packet: &[u8]) -> io::Result<()> {
        self.data.send_to(packet, self.peer_data).map(|_| ())
    }

    pub fn write_control(&self, packet: &[u8]) -> io::Result<()> {
        self.control.send_to(packet, self.peer_control).map(|_| ())
    }

    /// Stop the control-receive thread. Sockets close when the pair drops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Start the control-receive thread; `on_control` runs on that thread
    /// for every inbound RTCP datagram until the pair is closed.
    pub fn spawn_control_listener<F>(&self, on_control: F)
    where
        F: Fn(&[u8]) + Send + 'static,
    {
        let socket = self.control.clone();
        let closed = self.closed.clone();
        let _ = socket.set_read_timeout(Some(CONTROL_POLL));

        thread::spawn(move || {
            let mut buf = [0u8; 1500];
            while !closed.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((len, _)) => on_control(&buf[..len]),
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "RTCP receive thread exiting");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_binds_adjacent_even_odd_ports() {
        let pair = UdpPair::bind("127.0.0.1".parse().unwrap(), 9000, 9001).unwrap();
        assert_eq!(pair.data_port() % 2, 0);
        assert_eq!(pair.control_port(), pair.data_port() + 1);
        assert!(pair.data_port() >= UDP_PORT_MIN && pair.data_port() < UDP_PORT_MAX);
    }

    #[test]
    fn pairs_do_not_collide() {
        let a = UdpPair::bind("127.0.0.1".parse().unwrap(), 9000, 9001).unwrap();
        let b = UdpPair::bind("127.0.0.1".parse().unwrap(), 9002, 9003).unwrap();
        assert_ne!(a.data_port(), b.data_port());
    }

    #[test]
    fn data_reaches_the_peer_port() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let pair = UdpPair::bind("127.0.0.1".parse().unwrap(), port, port + 1).unwrap();
        pair.write_data(&[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3, 4]);
    }

    #[test]
    fn control_listener_reports_inbound_rtcp() {
        use std::sync::mpsc;

        let pair = UdpPair::bind("127.0.0.1".parse().unwrap(), 9000, 9001).unwrap();
        let (tx, rx) = mpsc::channel();
        pair.spawn_control_listener(move |packet| {
            let _ = tx.send(packet.to_vec());
        });

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&[0x80, 201, 0, 1], ("127.0.0.1", pair.control_port()))
            .unwrap();

        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, vec![0x80, 201, 0, 1]);
        pair.close();
    }
}

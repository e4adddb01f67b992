//! TCP side of the server: the accept loop, the per-connection RTSP
//! receive loop, and the interleaved transport (RFC 2326 §10.12).
//!
//! The RTSP socket carries three things, distinguished by the first byte
//! of each message: `$`-framed binary channels (RTP/RTCP, both
//! directions), and plain-text RTSP requests. The receive loop reads one
//! byte to decide, then consumes exactly one frame or one request.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::protocol::{MethodHandler, RtspRequest};
use crate::server::ServerInner;
use crate::session::Connection;

/// Interleaved frame prefix: `$<channel:u8><len:u16 BE>`.
const FRAME_MAGIC: u8 = b'$';

/// RTP-over-TCP transport: `$`-framed channels multiplexed on the RTSP
/// socket. Shares the connection's stream mutex so frames never interleave
/// with RTSP responses mid-message.
#[derive(Debug)]
pub struct TcpInterleaved {
    stream: Arc<Mutex<TcpStream>>,
    data_channel: u8,
    control_channel: u8,
}

impl TcpInterleaved {
    pub fn new(stream: Arc<Mutex<TcpStream>>, data_channel: u8, control_channel: u8) -> Self {
        Self {
            stream,
            data_channel,
            control_channel,
        }
    }

    pub fn data_channel(&self) -> u8 {
        self.data_channel
    }

    pub fn control_channel(&self) -> u8 {
        self.control_channel
    }

    pub fn write_data(&self, packet: &[u8]) -> io::Result<()> {
        self.write_framed(self.data_channel, packet)
    }

    pub fn write_control(&self, packet: &[u8]) -> io::Result<()> {
        self.write_framed(self.control_channel, packet)
    }

    fn write_framed(&self, channel: u8, payload: &[u8]) -> io::Result<()> {
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.push(FRAME_MAGIC);
        frame.push(channel);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);

        let mut stream = self.stream.lock();
        stream.write_all(&frame)
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the running flag between accepts with a 50 ms poll interval so
/// that [`Server::stop_listen`](crate::Server::stop_listen) can terminate
/// it promptly.
pub(crate) fn accept_loop(listener: TcpListener, inner: Arc<ServerInner>) {
    while inner.running() {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let inner = inner.clone();
                thread::spawn(move || {
                    connection_loop(stream, peer_addr, inner);
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if inner.running() {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// Lifecycle of one client connection: register, serve requests, clean up.
fn connection_loop(stream: TcpStream, peer_addr: SocketAddr, inner: Arc<ServerInner>) {
    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };

    let connection = Arc::new(Connection::new(stream, peer_addr, inner.next_ssrc()));
    inner.registry().insert(connection.clone());

    let handler = MethodHandler::new(inner.clone(), connection.clone());
    let mut reader = BufReader::new(reader_stream);

    let reason = receive_loop(&mut reader, &handler, &connection, &inner);

    inner.registry().remove(&connection);
    connection.shutdown();
    tracing::info!(%peer_addr, reason, "client disconnected");
}

/// RTSP request/response loop. Returns the reason for exiting.
fn receive_loop(
    reader: &mut BufReader<TcpStream>,
    handler: &MethodHandler,
    connection: &Arc<Connection>,
    inner: &Arc<ServerInner>,
) -> &'static str {
    while inner.running() {
        let mut first = [0u8; 1];
        match reader.read_exact(&mut first) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return "connection closed by client";
            }
            Err(_) => return "read error",
        }

        if first[0] == FRAME_MAGIC {
            if read_interleaved_frame(reader, connection).is_err() {
                return "read error";
            }
            continue;
        }

        let request_text = match read_request_text(reader, first[0]) {
            Ok(text) => text,
            Err(_) => return "read error",
        };
        if request_text.trim().is_empty() {
            continue;
        }

        match RtspRequest::parse(&request_text) {
            Ok(request) => {
                tracing::debug!(
                    peer = %connection.peer_addr(),
                    method = %request.method,
                    uri = %request.uri,
                    "request"
                );

                let outcome = handler.handle(&request);

                tracing::debug!(
                    peer = %connection.peer_addr(),
                    status = outcome.response.status_code,
                    "response"
                );

                if connection
                    .send_response(outcome.response.serialize().as_bytes())
                    .is_err()
                {
                    return "write error";
                }
                if outcome.end_connection {
                    return "connection ended by server";
                }
            }
            Err(e) => {
                tracing::warn!(peer = %connection.peer_addr(), error = %e, "parse error");
            }
        }
    }

    "server shutting down"
}

/// Consume one inbound `$` frame (client RTCP on a control channel).
fn read_interleaved_frame(
    reader: &mut BufReader<TcpStream>,
    connection: &Arc<Connection>,
) -> io::Result<()> {
    let mut header = [0u8; 3];
    reader.read_exact(&mut header)?;
    let channel = header[0];
    let len = u16::from_be_bytes([header[1], header[2]]) as usize;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    tracing::trace!(channel, len, "interleaved frame from client");
    connection.note_interleaved(channel);
    Ok(())
}

/// Read one RTSP request's text, `first` being its already-consumed first
/// byte. Any body announced via Content-Length is drained and discarded.
fn read_request_text(reader: &mut BufReader<TcpStream>, first: u8) -> io::Result<String> {
    let mut text = String::new();
    text.push(first as char);

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        text.push_str(&line);
        if line == "\r\n" || line == "\n" {
            break;
        }
    }

    if let Some(len) = content_length(&text) {
        if len > 0 {
            io::copy(&mut reader.by_ref().take(len as u64), &mut io::sink())?;
        }
    }

    Ok(text)
}

fn content_length(request_text: &str) -> Option<usize> {
    request_text
        .lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("Content-Length")
                .then(|| value.trim().parse().ok())?
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn interleaved_framing() {
        let (server, client) = stream_pair();
        let transport = TcpInterleaved::new(Arc::new(Mutex::new(server)), 0, 1);

        transport.write_data(&[0xAA, 0xBB, 0xCC]).unwrap();
        transport.write_control(&[0x01]).unwrap();

        let mut reader = BufReader::new(client);
        let mut frame = [0u8; 7];
        reader.read_exact(&mut frame).unwrap();
        assert_eq!(frame, [b'$', 0, 0, 3, 0xAA, 0xBB, 0xCC]);

        let mut frame = [0u8; 5];
        reader.read_exact(&mut frame).unwrap();
        assert_eq!(frame, [b'$', 1, 0, 1, 0x01]);
    }

    #[test]
    fn content_length_lookup() {
        let text = "GET_PARAMETER rtsp://h/ RTSP/1.0\r\nCSeq: 5\r\ncontent-length: 12\r\n\r\n";
        assert_eq!(content_length(text), Some(12));

        let text = "OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        assert_eq!(content_length(text), None);
    }

    #[test]
    fn read_request_reassembles_first_byte() {
        let (server, mut client) = stream_pair();
        client
            .write_all(b"OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 9\r\n\r\n")
            .unwrap();

        let mut reader = BufReader::new(server);
        let mut first = [0u8; 1];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(first[0], b'O');

        let text = read_request_text(&mut reader, first[0]).unwrap();
        assert!(text.starts_with("OPTIONS rtsp://h/ RTSP/1.0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn request_body_is_drained() {
        let (server, mut client) = stream_pair();
        client
            .write_all(b"GET_PARAMETER rtsp://h/ RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 4\r\n\r\nabcdOPTIONS")
            .unwrap();

        let mut reader = BufReader::new(server);
        let mut first = [0u8; 1];
        reader.read_exact(&mut first).unwrap();
        read_request_text(&mut reader, first[0]).unwrap();

        // next byte after the drained body is the following request
        let mut next = [0u8; 1];
        reader.read_exact(&mut next).unwrap();
        assert_eq!(next[0], b'O');
    }
}

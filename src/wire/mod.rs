//! MLLP transport: frames HL7 payloads on and off a TCP connection to the upstream
//! feed, and transparently reconnects when the connection drops.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::WireError;

/// MLLP start-of-block sentinel (vertical tab).
pub const START_BLOCK: u8 = 0x0B;
/// MLLP end-of-block sentinel (file separator).
pub const END_BLOCK: u8 = 0x1C;
/// MLLP trailing carriage return that follows the end block.
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Outcome of a single read attempt against the wire.
pub enum FrameOutcome {
    Frame(Vec<u8>),
    ReconnectNeeded,
}

/// An active MLLP connection plus the byte accumulator for its in-flight frame.
///
/// The accumulator persists across `read_frame` calls so a start sentinel seen in one
/// TCP segment and its payload/end sentinel in the next are still assembled into a
/// single frame (S4 in SPEC_FULL.md §8).
pub struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    read_buf: [u8; 4096],
}

impl Connection {
    pub async fn connect(address: &str) -> Result<Self, WireError> {
        log::info!("connecting to MLLP upstream at {}", address);
        let stream = TcpStream::connect(address).await?;
        Ok(Self {
            stream,
            buffer: Vec::new(),
            read_buf: [0u8; 4096],
        })
    }

    /// Reads bytes until a complete frame has been accumulated, or the connection
    /// needs to be re-established.
    pub async fn read_frame(&mut self) -> FrameOutcome {
        loop {
            if let Some(frame) = self.try_take_frame() {
                return FrameOutcome::Frame(frame);
            }

            match self.stream.read(&mut self.read_buf).await {
                Ok(0) => {
                    log::warn!("MLLP upstream closed the connection");
                    return FrameOutcome::ReconnectNeeded;
                }
                Ok(n) => self.buffer.extend_from_slice(&self.read_buf[..n]),
                Err(err) => {
                    log::warn!("error reading from MLLP upstream: {}", err);
                    return FrameOutcome::ReconnectNeeded;
                }
            }
        }
    }

    /// Scans the accumulator for a complete frame. Bytes before a start sentinel are
    /// discarded (robustness against stray keepalives); bytes after a consumed frame
    /// remain buffered for the next call.
    fn try_take_frame(&mut self) -> Option<Vec<u8>> {
        let start = self.buffer.iter().position(|&b| b == START_BLOCK)?;
        if start > 0 {
            self.buffer.drain(0..start);
        }

        let mut end = None;
        for i in 1..self.buffer.len().saturating_sub(1) {
            if self.buffer[i] == END_BLOCK && self.buffer[i + 1] == CARRIAGE_RETURN {
                end = Some(i);
                break;
            }
        }
        let end = end?;

        let payload = self.buffer[1..end].to_vec();
        self.buffer.drain(0..=end + 1);
        Some(payload)
    }

    /// Sends a payload wrapped in MLLP framing. Any write failure is surfaced so the
    /// caller treats the connection as needing reconnection on its next read.
    pub async fn send_framed(&mut self, payload: &str) -> Result<(), WireError> {
        let mut frame = Vec::with_capacity(payload.len() + 3);
        frame.push(START_BLOCK);
        frame.extend_from_slice(payload.as_bytes());
        frame.push(END_BLOCK);
        frame.push(CARRIAGE_RETURN);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

/// Connects, retrying immediately (no backoff is specified at this layer per
/// SPEC_FULL.md §4.1) until a connection succeeds.
pub async fn connect_with_retry(address: &str) -> Connection {
    loop {
        match Connection::connect(address).await {
            Ok(conn) => return conn,
            Err(err) => {
                log::warn!("failed to connect to {}: {}, retrying", address, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reads_frame_split_across_segments() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&[START_BLOCK]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            socket
                .write_all(&[b'H', b'I', END_BLOCK, CARRIAGE_RETURN])
                .await
                .unwrap();
        });

        let mut conn = Connection::connect(&addr.to_string()).await.unwrap();
        let outcome = conn.read_frame().await;
        match outcome {
            FrameOutcome::Frame(payload) => assert_eq!(payload, b"HI"),
            FrameOutcome::ReconnectNeeded => panic!("expected a frame"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reports_reconnect_needed_on_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // drop immediately, closing the connection
        });

        let mut conn = Connection::connect(&addr.to_string()).await.unwrap();
        let outcome = conn.read_frame().await;
        assert!(matches!(outcome, FrameOutcome::ReconnectNeeded));
        server.await.unwrap();
    }
}

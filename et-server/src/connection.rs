//! Per-client TCP connection state: a byte-accumulating read buffer framed
//! by `et_net::FrameHeader`, and an outbound queue flushed as the socket
//! allows. Each response begins with a status int.

use et_core::ids::{AttachmentId, ProcessId};
use et_net::FrameHeader;
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, Read, Write};

pub type Token = usize;

/// One frame fully read off the wire: opcode plus body bytes, ready for
/// `dispatch::handle`.
pub struct InboundFrame {
    pub opcode: u16,
    pub body: Vec<u8>,
}

pub struct Connection {
    pub stream: TcpStream,
    pub process: ProcessId,
    /// The attachment this connection holds, if it has issued
    /// `STATION-ATTACH`; a connection may hold at most one at a time,
    /// matching one client process per socket.
    pub attachment: Option<AttachmentId>,
    read_buf: Vec<u8>,
    write_buf: VecDeque<u8>,
    pub closing: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, process: ProcessId) -> Connection {
        Connection {
            stream,
            process,
            attachment: None,
            read_buf: Vec::new(),
            write_buf: VecDeque::new(),
            closing: false,
        }
    }

    /// Reads everything currently available and extracts as many complete
    /// frames as the buffer holds. Returns `Ok(false)` when the peer has
    /// closed the socket.
    pub fn read_frames(&mut self, out: &mut Vec<InboundFrame>) -> io::Result<bool> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }

        loop {
            if self.read_buf.len() < FrameHeader::SIZE {
                break;
            }
            let mut header_bytes = &self.read_buf[..FrameHeader::SIZE];
            let header = FrameHeader::read(&mut header_bytes)?;
            let total = FrameHeader::SIZE + header.body_len as usize;
            if self.read_buf.len() < total {
                break;
            }
            let body = self.read_buf[FrameHeader::SIZE..total].to_vec();
            self.read_buf.drain(..total);
            out.push(InboundFrame { opcode: header.opcode, body });
        }
        Ok(true)
    }

    pub fn queue_response(&mut self, opcode: u16, body: &[u8]) -> io::Result<()> {
        let header = FrameHeader { opcode, body_len: body.len() as u32 };
        let mut framed = Vec::with_capacity(FrameHeader::SIZE + body.len());
        header.write(&mut framed)?;
        framed.extend_from_slice(body);
        self.write_buf.extend(framed);
        Ok(())
    }

    /// Flushes as much of the outbound queue as the socket accepts right
    /// now, leaving the remainder for the next writable readiness.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            let (front, _) = self.write_buf.as_slices();
            match self.stream.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_buf.is_empty()
    }
}

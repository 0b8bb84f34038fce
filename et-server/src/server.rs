//! The network server: one `mio::Poll`-driven event loop exposing
//! `EtSystem`'s operations to TCP clients, plus the UDP discovery
//! responder.

use crate::connection::{Connection, InboundFrame};
use crate::dispatch;
use crate::discovery::Discovery;
use et_core::error::EtError;
use et_core::system::EtSystem;
use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Poll, PollOpt, Ready, Token};
use slog::Logger;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(0);
const DISCOVERY_TOKEN: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    discovery: Option<Discovery>,
    system: Arc<EtSystem>,
    connections: Vec<Option<Connection>>,
    free: Vec<usize>,
    logger: Logger,
}

impl Server {
    pub fn bind(addr: SocketAddr, system: Arc<EtSystem>, logger: Logger) -> io::Result<Server> {
        let listener = TcpListener::bind(&addr)?;
        let poll = Poll::new()?;
        poll.register(&listener, LISTENER_TOKEN, Ready::readable(), PollOpt::edge())?;

        Ok(Server {
            poll,
            listener,
            discovery: None,
            system,
            connections: Vec::new(),
            free: Vec::new(),
            logger,
        })
    }

    /// Also answers UDP discovery probes on `discovery`; without this call
    /// the server is TCP-only.
    pub fn with_discovery(mut self, discovery: Discovery) -> io::Result<Server> {
        self.poll.register(discovery.socket(), DISCOVERY_TOKEN, Ready::readable(), PollOpt::edge())?;
        self.discovery = Some(discovery);
        Ok(self)
    }

    /// Runs the event loop until `quit` is set, polling with a bounded
    /// timeout so the flag is re-checked periodically even with no I/O
    /// activity.
    pub fn run(&mut self, quit: &AtomicBool) -> io::Result<()> {
        let mut events = Events::with_capacity(1024);
        while !quit.load(Ordering::SeqCst) {
            self.poll.poll(&mut events, Some(Duration::from_millis(200)))?;
            for event in &events {
                match event.token() {
                    LISTENER_TOKEN => self.accept()?,
                    DISCOVERY_TOKEN => {
                        if let Some(discovery) = &self.discovery {
                            if let Err(err) = discovery.service(&self.system) {
                                slog::warn!(self.logger, "discovery service error"; "context" => "discovery", "error" => %err);
                            }
                        }
                    }
                    token => self.service_connection(token.0),
                }
            }
        }
        Ok(())
    }

    fn accept(&mut self) -> io::Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            };

            let process = self.system.allocate_process();
            let slot = self.free.pop().unwrap_or_else(|| {
                self.connections.push(None);
                self.connections.len() - 1
            });
            let token = Token(slot + FIRST_CONNECTION_TOKEN);

            self.poll.register(&stream, token, Ready::readable() | Ready::writable(), PollOpt::edge())?;
            self.connections[slot] = Some(Connection::new(stream, process));

            slog::info!(self.logger, "client connected"; "context" => "server", "peer" => %peer, "slot" => slot);
        }
    }

    fn service_connection(&mut self, slot: usize) {
        let mut frames = Vec::new();
        let mut fatal = false;

        if let Some(conn) = self.connections[slot].as_mut() {
            match conn.read_frames(&mut frames) {
                Ok(true) => {}
                Ok(false) => fatal = true,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(_) => fatal = true,
            }
        }

        for frame in frames {
            self.dispatch_frame(slot, frame);
        }

        if let Some(conn) = self.connections[slot].as_mut() {
            if conn.flush().is_err() {
                fatal = true;
            }
            if conn.closing && !conn.has_pending_writes() {
                fatal = true;
            }
        }

        if fatal {
            self.close_connection(slot);
        }
    }

    fn dispatch_frame(&mut self, slot: usize, frame: InboundFrame) {
        let system = self.system.clone();
        if let Some(conn) = self.connections[slot].as_mut() {
            if let Err(err) = dispatch::handle(&system, conn, frame.opcode, &frame.body) {
                slog::warn!(self.logger, "failed to encode response"; "context" => "server", "slot" => slot, "error" => %err);
            }
        }
    }

    fn close_connection(&mut self, slot: usize) {
        if let Some(conn) = self.connections[slot].take() {
            if let Some(attachment_id) = conn.attachment {
                if let Err(err) = self.system.detach(attachment_id) {
                    if err != EtError::Busy {
                        slog::warn!(self.logger, "detach on disconnect failed"; "context" => "server", "error" => %err);
                    }
                }
            }
            let _ = self.poll.deregister(&conn.stream);
            self.free.push(slot);
            slog::info!(self.logger, "client disconnected"; "context" => "server", "slot" => slot);
        }
    }
}

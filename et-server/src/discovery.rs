//! UDP discovery: answers a broadcast/multicast probe with this system's
//! name, TCP port, and host addresses.

use et_core::system::EtSystem;
use et_net::{DiscoveryProbe, DiscoveryReply, ReportedAddress, WireMessage, MAGIC, PROTOCOL_VERSION};
use mio::net::UdpSocket;
use std::io;
use std::net::SocketAddr;

pub struct Discovery {
    socket: UdpSocket,
    system_name: String,
    tcp_port: u16,
    addresses: Vec<ReportedAddress>,
    host_uname: String,
    canonical_host: String,
}

impl Discovery {
    pub fn bind(
        addr: SocketAddr,
        system_name: impl Into<String>,
        tcp_port: u16,
        addresses: Vec<ReportedAddress>,
        host_uname: impl Into<String>,
        canonical_host: impl Into<String>,
    ) -> io::Result<Discovery> {
        Ok(Discovery {
            socket: UdpSocket::bind(&addr)?,
            system_name: system_name.into(),
            tcp_port,
            addresses,
            host_uname: host_uname.into(),
            canonical_host: canonical_host.into(),
        })
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Drains every pending probe and answers each with a reply, as long
    /// as the magic and version match. Anything else is rejected silently
    /// rather than erroring, since discovery is inherently best-effort.
    pub fn service(&self, _system: &EtSystem) -> io::Result<()> {
        let mut buf = [0u8; 512];
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            };

            let probe = match DiscoveryProbe::decode(&mut &buf[..n]) {
                Ok(probe) => probe,
                Err(_) => continue,
            };
            if probe.magic != MAGIC || probe.version != PROTOCOL_VERSION {
                continue;
            }

            self.reply_to(peer)?;
        }
        Ok(())
    }

    fn reply_to(&self, peer: SocketAddr) -> io::Result<()> {
        let reply = DiscoveryReply {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            tcp_port: self.tcp_port,
            cast_type: 0,
            cast_address: [0, 0, 0, 0],
            host_uname: self.host_uname.clone(),
            canonical_host: self.canonical_host.clone(),
            addresses: self.addresses.clone(),
        };
        let mut encoded = Vec::new();
        reply.encode(&mut encoded)?;
        self.socket.send_to(&encoded, &peer)?;
        Ok(())
    }

    pub fn system_name(&self) -> &str {
        &self.system_name
    }
}

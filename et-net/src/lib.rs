//! Wire-level types shared between the network server and any remote
//! client: opcodes, the closed status-code mapping, a fixed-layout frame
//! header, and the `WireMessage` trait the `et-macros` derive targets.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use et_core::error::EtError;
use std::io;

/// A request/response struct with a fixed big-endian layout. Implemented by
/// `#[derive(WireMessage)]` for every opcode's payload struct; frame bodies
/// are otherwise opaque bytes to `et-net` itself, which fixes only the
/// header and status convention.
pub trait WireMessage: Sized {
    fn encode<W: io::Write>(&self, w: &mut W) -> io::Result<()>;
    fn decode<R: io::Read>(r: &mut R) -> io::Result<Self>;
}

/// Every remote operation the core exposes: system lifecycle (open, close,
/// kill, alive, wake), station management (create, remove, attach, detach),
/// event operations (new, new-group, get, put, dump, in both singular and
/// plural forms), and system introspection (get-stations, get-attachments,
/// get-event-count, get-heartbeat).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Open = 0,
    Close = 1,
    Kill = 2,
    Alive = 3,
    WakeAttach = 4,
    WakeAll = 5,

    StationCreate = 10,
    StationRemove = 11,
    StationAttach = 12,
    StationDetach = 13,

    EventNew = 20,
    EventNewGroup = 21,
    EventGet = 22,
    EventGetMany = 23,
    EventPut = 24,
    EventPutMany = 25,
    EventDump = 26,
    EventDumpMany = 27,

    SystemGetStations = 40,
    SystemGetAttachments = 41,
    SystemGetEventCount = 42,
    SystemGetHeartbeat = 43,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Opcode> {
        use Opcode::*;
        Some(match value {
            0 => Open,
            1 => Close,
            2 => Kill,
            3 => Alive,
            4 => WakeAttach,
            5 => WakeAll,
            10 => StationCreate,
            11 => StationRemove,
            12 => StationAttach,
            13 => StationDetach,
            20 => EventNew,
            21 => EventNewGroup,
            22 => EventGet,
            23 => EventGetMany,
            24 => EventPut,
            25 => EventPutMany,
            26 => EventDump,
            27 => EventDumpMany,
            40 => SystemGetStations,
            41 => SystemGetAttachments,
            42 => SystemGetEventCount,
            43 => SystemGetHeartbeat,
            _ => return None,
        })
    }
}

/// Closed status taxonomy, carried as the first int of every response. `Ok`
/// has no `EtError` counterpart; every other variant maps 1:1 onto one
/// `EtError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Error = 1,
    Timeout = 2,
    NotImplemented = 3,
    BadArgument = 4,
    BadFormat = 5,
    BadDomainType = 6,
    AlreadyExists = 7,
    NotInitialized = 8,
    AlreadyInit = 9,
    LostConnection = 10,
    NetworkError = 11,
    SocketError = 12,
    PendError = 13,
    IllegalMsgType = 14,
    OutOfMemory = 15,
    OutOfRange = 16,
    LimitExceeded = 17,
    BadDomainId = 18,
    BadMessage = 19,
    WrongDomainType = 20,
    DifferentVersion = 21,
    WrongPassword = 22,
    ServerDied = 23,
    Abort = 24,
    Wakeup = 25,
    Empty = 26,
    Busy = 27,
    Dead = 28,
    Read = 29,
    Write = 30,
    Remote = 31,
    TooMany = 32,
}

impl Status {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Status> {
        use Status::*;
        Some(match value {
            0 => Ok,
            1 => Error,
            2 => Timeout,
            3 => NotImplemented,
            4 => BadArgument,
            5 => BadFormat,
            6 => BadDomainType,
            7 => AlreadyExists,
            8 => NotInitialized,
            9 => AlreadyInit,
            10 => LostConnection,
            11 => NetworkError,
            12 => SocketError,
            13 => PendError,
            14 => IllegalMsgType,
            15 => OutOfMemory,
            16 => OutOfRange,
            17 => LimitExceeded,
            18 => BadDomainId,
            19 => BadMessage,
            20 => WrongDomainType,
            21 => DifferentVersion,
            22 => WrongPassword,
            23 => ServerDied,
            24 => Abort,
            25 => Wakeup,
            26 => Empty,
            27 => Busy,
            28 => Dead,
            29 => Read,
            30 => Write,
            31 => Remote,
            32 => TooMany,
            _ => return None,
        })
    }
}

impl From<&EtError> for Status {
    fn from(err: &EtError) -> Status {
        match err {
            EtError::Error => Status::Error,
            EtError::Timeout => Status::Timeout,
            EtError::NotImplemented => Status::NotImplemented,
            EtError::BadArgument => Status::BadArgument,
            EtError::BadFormat => Status::BadFormat,
            EtError::BadDomainType => Status::BadDomainType,
            EtError::AlreadyExists => Status::AlreadyExists,
            EtError::NotInitialized => Status::NotInitialized,
            EtError::AlreadyInit => Status::AlreadyInit,
            EtError::LostConnection => Status::LostConnection,
            EtError::NetworkError => Status::NetworkError,
            EtError::SocketError => Status::SocketError,
            EtError::PendError => Status::PendError,
            EtError::IllegalMsgType => Status::IllegalMsgType,
            EtError::OutOfMemory => Status::OutOfMemory,
            EtError::OutOfRange => Status::OutOfRange,
            EtError::LimitExceeded => Status::LimitExceeded,
            EtError::BadDomainId => Status::BadDomainId,
            EtError::BadMessage => Status::BadMessage,
            EtError::WrongDomainType => Status::WrongDomainType,
            EtError::DifferentVersion => Status::DifferentVersion,
            EtError::WrongPassword => Status::WrongPassword,
            EtError::ServerDied => Status::ServerDied,
            EtError::Abort => Status::Abort,
            EtError::Wakeup => Status::Wakeup,
            EtError::Empty => Status::Empty,
            EtError::Busy => Status::Busy,
            EtError::Dead => Status::Dead,
            EtError::Read => Status::Read,
            EtError::Write => Status::Write,
            EtError::Remote => Status::Remote,
            EtError::TooMany => Status::TooMany,
            EtError::Io(_) => Status::NetworkError,
        }
    }
}

/// Fixed 8-byte header prefixing every request/response frame: opcode,
/// reserved alignment padding, and the body's byte length (the body itself
/// is whatever `WireMessage` struct the opcode pairs with).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: u16,
    pub body_len: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<BigEndian>(self.opcode)?;
        w.write_u16::<BigEndian>(0)?;
        w.write_u32::<BigEndian>(self.body_len)
    }

    pub fn read<R: io::Read>(r: &mut R) -> io::Result<FrameHeader> {
        let opcode = r.read_u16::<BigEndian>()?;
        let _reserved = r.read_u16::<BigEndian>()?;
        let body_len = r.read_u32::<BigEndian>()?;
        Ok(FrameHeader { opcode, body_len })
    }
}

/// Magic triplet prefixing both the UDP discovery probe and reply, and
/// checked against `header::MAGIC` on the TCP side at `OPEN`.
pub const MAGIC: [u8; 3] = *b"ET\x01";
pub const PROTOCOL_VERSION: u16 = 1;

/// UDP discovery probe: magic triplet, version, name length, name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryProbe {
    pub magic: [u8; 3],
    pub version: u16,
    pub name: String,
}

impl WireMessage for DiscoveryProbe {
    fn encode<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_u16::<BigEndian>(self.version)?;
        let name_bytes = self.name.as_bytes();
        w.write_u16::<BigEndian>(name_bytes.len() as u16)?;
        w.write_all(name_bytes)
    }

    fn decode<R: io::Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 3];
        r.read_exact(&mut magic)?;
        let version = r.read_u16::<BigEndian>()?;
        let name_len = r.read_u16::<BigEndian>()? as usize;
        let mut name_buf = vec![0u8; name_len];
        r.read_exact(&mut name_buf)?;
        let name = String::from_utf8(name_buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(DiscoveryProbe { magic, version, name })
    }
}

/// One IPv4 address reported in a discovery reply, carried both as
/// network-order bytes and its dotted-decimal rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedAddress {
    pub net_order: [u8; 4],
    pub dotted_decimal: String,
}

/// UDP discovery reply: magic triplet, version, TCP port, cast type echoed,
/// original cast address echoed, host uname, canonical host name, address
/// count, and the per-address net-order/dotted-decimal pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub magic: [u8; 3],
    pub version: u16,
    pub tcp_port: u16,
    pub cast_type: u8,
    pub cast_address: [u8; 4],
    pub host_uname: String,
    pub canonical_host: String,
    pub addresses: Vec<ReportedAddress>,
}

impl WireMessage for DiscoveryReply {
    fn encode<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.magic)?;
        w.write_u16::<BigEndian>(self.version)?;
        w.write_u16::<BigEndian>(self.tcp_port)?;
        w.write_u8(self.cast_type)?;
        w.write_all(&self.cast_address)?;
        write_string(w, &self.host_uname)?;
        write_string(w, &self.canonical_host)?;
        w.write_u16::<BigEndian>(self.addresses.len() as u16)?;
        for address in &self.addresses {
            w.write_all(&address.net_order)?;
            write_string(w, &address.dotted_decimal)?;
        }
        Ok(())
    }

    fn decode<R: io::Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 3];
        r.read_exact(&mut magic)?;
        let version = r.read_u16::<BigEndian>()?;
        let tcp_port = r.read_u16::<BigEndian>()?;
        let cast_type = r.read_u8()?;
        let mut cast_address = [0u8; 4];
        r.read_exact(&mut cast_address)?;
        let host_uname = read_string(r)?;
        let canonical_host = read_string(r)?;
        let address_count = r.read_u16::<BigEndian>()? as usize;
        let mut addresses = Vec::with_capacity(address_count);
        for _ in 0..address_count {
            let mut net_order = [0u8; 4];
            r.read_exact(&mut net_order)?;
            let dotted_decimal = read_string(r)?;
            addresses.push(ReportedAddress { net_order, dotted_decimal });
        }
        Ok(DiscoveryReply {
            magic,
            version,
            tcp_port,
            cast_type,
            cast_address,
            host_uname,
            canonical_host,
            addresses,
        })
    }
}

fn write_string<W: io::Write>(w: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

fn read_string<R: io::Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_header_round_trips() {
        let header = FrameHeader { opcode: Opcode::EventNew as u16, body_len: 42 };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len(), FrameHeader::SIZE);
        let read_back = FrameHeader::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn opcode_round_trips_through_u16() {
        assert_eq!(Opcode::from_u16(Opcode::StationAttach as u16), Some(Opcode::StationAttach));
        assert_eq!(Opcode::from_u16(9999), None);
    }

    #[test]
    fn status_maps_from_et_error() {
        assert_eq!(Status::from(&EtError::Busy), Status::Busy);
        assert_eq!(Status::from(&EtError::Io(io::ErrorKind::Other)), Status::NetworkError);
    }

    #[test]
    fn discovery_probe_round_trips() {
        let probe = DiscoveryProbe { magic: MAGIC, version: PROTOCOL_VERSION, name: "mysys".to_string() };
        let mut buf = Vec::new();
        probe.encode(&mut buf).unwrap();
        let decoded = DiscoveryProbe::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, probe);
    }

    #[test]
    fn discovery_reply_round_trips_with_addresses() {
        let reply = DiscoveryReply {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            tcp_port: 11_111,
            cast_type: 0,
            cast_address: [239, 200, 0, 1],
            host_uname: "host1".to_string(),
            canonical_host: "host1.example.com".to_string(),
            addresses: vec![ReportedAddress {
                net_order: [192, 168, 0, 5],
                dotted_decimal: "192.168.0.5".to_string(),
            }],
        };
        let mut buf = Vec::new();
        reply.encode(&mut buf).unwrap();
        let decoded = DiscoveryReply::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, reply);
    }
}

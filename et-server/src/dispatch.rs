//! Opcode dispatch: decodes a frame body into one of `wire`'s fixed-layout
//! request structs, calls into the local `EtSystem`/`Attachment` the same
//! way an in-process caller would, and encodes a status-prefixed response.

use crate::connection::Connection;
use crate::wire::*;
use et_core::error::EtError;
use et_core::event::Priority;
use et_core::ids::{AttachmentId, PlaceIndex, StationId, GRANDCENTRAL};
use et_core::list::WaitMode;
use et_core::system::EtSystem;
use et_net::{Status, WireMessage};
use std::io::Cursor;

/// Dispatches one frame and writes the encoded response straight onto the
/// connection's outbound queue.
pub fn handle(system: &EtSystem, conn: &mut Connection, opcode: u16, body: &[u8]) -> std::io::Result<()> {
    let mut cursor = Cursor::new(body);
    let result = dispatch_opcode(system, conn, opcode, &mut cursor);

    let (status, response_body) = match result {
        Ok(bytes) => (Status::Ok, bytes),
        Err(err) => (Status::from(&err), Vec::new()),
    };

    let mut out = Vec::with_capacity(4 + response_body.len());
    {
        use byteorder::{BigEndian, WriteBytesExt};
        out.write_i32::<BigEndian>(status.as_i32())?;
    }
    out.extend_from_slice(&response_body);
    conn.queue_response(opcode, &out)
}

fn dispatch_opcode(
    system: &EtSystem,
    conn: &mut Connection,
    opcode: u16,
    cursor: &mut Cursor<&[u8]>,
) -> Result<Vec<u8>, EtError> {
    let opcode = et_net::Opcode::from_u16(opcode).ok_or(EtError::IllegalMsgType)?;

    match opcode {
        et_net::Opcode::Open => {
            let _request = OpenRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            Ok(Vec::new())
        }
        et_net::Opcode::Close => {
            conn.closing = true;
            Ok(Vec::new())
        }
        et_net::Opcode::Alive => {
            let alive = !system.is_dead()?;
            encode(&AliveResponse { alive: alive as u8 })
        }
        et_net::Opcode::StationAttach => {
            let request = StationAttachRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            let attachment = system.attach(StationId(request.station_id), conn.process)?;
            conn.attachment = Some(attachment.id);
            encode(&AttachmentIdResponse { attachment_id: attachment.id.0 })
        }
        et_net::Opcode::StationDetach => {
            let request = StationDetachRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            system.detach(AttachmentId(request.attachment_id))?;
            conn.attachment = None;
            Ok(Vec::new())
        }
        et_net::Opcode::EventNew => {
            let request = EventNewRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            let attachment = system.attachment(AttachmentId(request.attachment_id)).ok_or(EtError::BadArgument)?;
            let grandcentral = system.station(GRANDCENTRAL)?;
            let priority = if request.priority == 0 { Priority::Low } else { Priority::High };
            let place = attachment.new_event(&grandcentral, system.pool(), request.size, priority, WaitMode::Async)?;
            encode(&PlaceResponse { place: place.0 })
        }
        et_net::Opcode::EventGet => {
            let request = EventGetRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            let attachment = system.attachment(AttachmentId(request.attachment_id)).ok_or(EtError::BadArgument)?;
            let station = system.station(StationId(request.station_id))?;
            let places = attachment.get(&station, system.pool(), 1, WaitMode::Async)?;
            encode(&PlaceResponse { place: places[0].0 })
        }
        et_net::Opcode::EventPut => {
            let request = EventPutRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            let attachment = system.attachment(AttachmentId(request.attachment_id)).ok_or(EtError::BadArgument)?;
            let station = system.station(StationId(request.station_id))?;
            let place = PlaceIndex(request.place);

            let payload_start = cursor.position() as usize;
            let payload = &cursor.get_ref()[payload_start..];
            let to_copy = (request.length as usize).min(payload.len());
            system.pool().data_mut(place)[..to_copy].copy_from_slice(&payload[..to_copy]);
            system.pool().with_descriptor_mut(place, |desc| desc.length = request.length);

            attachment.put(&station, system.pool(), &[place], WaitMode::Async)?;
            Ok(Vec::new())
        }
        et_net::Opcode::EventDump => {
            let request = EventDumpRequest::decode(cursor).map_err(|_| EtError::BadFormat)?;
            let attachment = system.attachment(AttachmentId(request.attachment_id)).ok_or(EtError::BadArgument)?;
            let grandcentral = system.station(GRANDCENTRAL)?;
            attachment.dump(system.pool(), &grandcentral, &[PlaceIndex(request.place)])?;
            Ok(Vec::new())
        }
        et_net::Opcode::SystemGetEventCount => encode(&EventCountResponse { count: system.pool().len() as u32 }),
        _ => Err(EtError::NotImplemented),
    }
}

fn encode<T: WireMessage>(value: &T) -> Result<Vec<u8>, EtError> {
    let mut buf = Vec::new();
    value.encode(&mut buf).map_err(|_| EtError::Write)?;
    Ok(buf)
}

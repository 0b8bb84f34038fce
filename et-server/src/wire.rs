//! Concrete request/response layouts for the opcode subset this server
//! dispatches: each command has a fixed request layout of big-endian ints
//! followed by optional variable-length blobs. Variable payload bytes
//! (event data) are not part of these derives; `dispatch` reads them
//! itself from whatever remains of the frame body after the fixed-layout
//! prefix.

use et_macros::WireMessage;

#[derive(WireMessage)]
pub struct OpenRequest {
    pub is_64_bit: u8,
}

#[derive(WireMessage)]
pub struct AliveResponse {
    pub alive: u8,
}

#[derive(WireMessage)]
pub struct StationAttachRequest {
    pub station_id: u32,
}

#[derive(WireMessage)]
pub struct AttachmentIdResponse {
    pub attachment_id: u32,
}

#[derive(WireMessage)]
pub struct StationDetachRequest {
    pub attachment_id: u32,
}

#[derive(WireMessage)]
pub struct EventNewRequest {
    pub attachment_id: u32,
    pub size: u32,
    pub priority: u8,
}

#[derive(WireMessage)]
pub struct PlaceResponse {
    pub place: u32,
}

#[derive(WireMessage)]
pub struct EventGetRequest {
    pub attachment_id: u32,
    pub station_id: u32,
}

#[derive(WireMessage)]
pub struct EventPutRequest {
    pub attachment_id: u32,
    pub station_id: u32,
    pub place: u32,
    pub length: u32,
}

#[derive(WireMessage)]
pub struct EventDumpRequest {
    pub attachment_id: u32,
    pub place: u32,
}

#[derive(WireMessage)]
pub struct EventCountResponse {
    pub count: u32,
}

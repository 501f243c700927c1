//! Field codecs on top of the frame layer.
//!
//! Fixed-width fields (`u8`, `i32`, `i64`, node ids) live in a message's
//! initial frame at statically computed offsets. Everything else (strings,
//! byte arrays, optional values, lists, nested structures) is written as
//! additional frames.

use bytes::{Buf, Bytes, BytesMut};
use tidepool_types::{Address, Member, MemberView, NodeId};

use crate::error::NetError;
use crate::frame::{Frame, FrameIter, FrameMessage, flags};

pub const BYTE_SIZE_IN_BYTES: usize = 1;
pub const INT_SIZE_IN_BYTES: usize = 4;
pub const LONG_SIZE_IN_BYTES: usize = 8;
pub const NODE_ID_SIZE_IN_BYTES: usize = 32;

pub const TYPE_FIELD_OFFSET: usize = 0;
pub const CORRELATION_ID_FIELD_OFFSET: usize = TYPE_FIELD_OFFSET + INT_SIZE_IN_BYTES;
pub const PARTITION_ID_FIELD_OFFSET: usize = CORRELATION_ID_FIELD_OFFSET + LONG_SIZE_IN_BYTES;
/// Size of the common initial-frame header; message fields start here.
pub const INITIAL_FRAME_HEADER_SIZE: usize = PARTITION_ID_FIELD_OFFSET + INT_SIZE_IN_BYTES;

/// Partition id carried by cluster-control messages.
pub const NO_PARTITION: i32 = -1;

// ---------------------------------------------------------------------------
// Fixed-size fields
// ---------------------------------------------------------------------------

fn field(buf: &[u8], offset: usize, size: usize) -> Result<&[u8], NetError> {
    buf.get(offset..offset + size).ok_or_else(|| {
        NetError::Frame(format!(
            "field at offset {offset} (size {size}) is outside a {}-byte frame",
            buf.len()
        ))
    })
}

pub fn encode_u8(buf: &mut [u8], offset: usize, value: u8) {
    buf[offset] = value;
}

pub fn decode_u8(buf: &[u8], offset: usize) -> Result<u8, NetError> {
    Ok(field(buf, offset, BYTE_SIZE_IN_BYTES)?[0])
}

pub fn encode_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + INT_SIZE_IN_BYTES].copy_from_slice(&value.to_le_bytes());
}

pub fn decode_i32(buf: &[u8], offset: usize) -> Result<i32, NetError> {
    Ok(field(buf, offset, INT_SIZE_IN_BYTES)?.get_i32_le())
}

pub fn encode_i64(buf: &mut [u8], offset: usize, value: i64) {
    buf[offset..offset + LONG_SIZE_IN_BYTES].copy_from_slice(&value.to_le_bytes());
}

pub fn decode_i64(buf: &[u8], offset: usize) -> Result<i64, NetError> {
    Ok(field(buf, offset, LONG_SIZE_IN_BYTES)?.get_i64_le())
}

pub fn encode_node_id(buf: &mut [u8], offset: usize, id: &NodeId) {
    buf[offset..offset + NODE_ID_SIZE_IN_BYTES].copy_from_slice(id.as_bytes());
}

pub fn decode_node_id(buf: &[u8], offset: usize) -> Result<NodeId, NetError> {
    let mut bytes = [0u8; NODE_ID_SIZE_IN_BYTES];
    bytes.copy_from_slice(field(buf, offset, NODE_ID_SIZE_IN_BYTES)?);
    Ok(NodeId::from(bytes))
}

/// Allocate an initial frame of `size` bytes with the common header filled in.
pub fn initial_frame(message_type: i32, correlation_id: i64, size: usize) -> BytesMut {
    let mut content = BytesMut::zeroed(size.max(INITIAL_FRAME_HEADER_SIZE));
    encode_i32(&mut content, TYPE_FIELD_OFFSET, message_type);
    encode_i64(&mut content, CORRELATION_ID_FIELD_OFFSET, correlation_id);
    encode_i32(&mut content, PARTITION_ID_FIELD_OFFSET, NO_PARTITION);
    content
}

/// Wrap a filled initial-frame buffer as the first frame of a message.
pub fn finish_initial_frame(content: BytesMut) -> Frame {
    Frame::with_flags(content.freeze(), flags::UNFRAGMENTED)
}

// ---------------------------------------------------------------------------
// Variable-size fields
// ---------------------------------------------------------------------------

pub fn encode_string(msg: &mut FrameMessage, value: &str) {
    msg.push(Frame::new(Bytes::copy_from_slice(value.as_bytes())));
}

pub fn decode_string(iter: &mut FrameIter<'_>) -> Result<String, NetError> {
    let frame = iter.next_frame()?;
    String::from_utf8(frame.content.to_vec())
        .map_err(|e| NetError::Frame(format!("invalid utf-8 string: {e}")))
}

pub fn encode_bytes(msg: &mut FrameMessage, value: &Bytes) {
    msg.push(Frame::new(value.clone()));
}

pub fn decode_bytes(iter: &mut FrameIter<'_>) -> Result<Bytes, NetError> {
    Ok(iter.next_frame()?.content.clone())
}

/// Encode an optional value, writing a null frame for `None`.
pub fn encode_nullable<T: ?Sized>(
    msg: &mut FrameMessage,
    value: Option<&T>,
    encode: impl FnOnce(&mut FrameMessage, &T),
) {
    match value {
        Some(v) => encode(msg, v),
        None => msg.push(Frame::null()),
    }
}

pub fn decode_nullable<T>(
    iter: &mut FrameIter<'_>,
    decode: impl FnOnce(&mut FrameIter<'_>) -> Result<T, NetError>,
) -> Result<Option<T>, NetError> {
    if iter.next_is_null() {
        iter.next_frame()?;
        Ok(None)
    } else {
        decode(iter).map(Some)
    }
}

/// Encode a list as a begin frame, one item encoding per element, an end frame.
pub fn encode_list<T>(
    msg: &mut FrameMessage,
    items: &[T],
    encode: impl Fn(&mut FrameMessage, &T),
) {
    msg.push(Frame::begin());
    for item in items {
        encode(msg, item);
    }
    msg.push(Frame::end());
}

pub fn decode_list<T>(
    iter: &mut FrameIter<'_>,
    decode: impl Fn(&mut FrameIter<'_>) -> Result<T, NetError>,
) -> Result<Vec<T>, NetError> {
    iter.expect_begin()?;
    let mut items = Vec::new();
    while !iter.next_is_end() {
        items.push(decode(iter)?);
    }
    iter.next_frame()?;
    Ok(items)
}

// ---------------------------------------------------------------------------
// Custom structures
// ---------------------------------------------------------------------------

const ADDRESS_PORT_FIELD_OFFSET: usize = 0;
const ADDRESS_INITIAL_FRAME_SIZE: usize = ADDRESS_PORT_FIELD_OFFSET + INT_SIZE_IN_BYTES;

pub fn encode_address(msg: &mut FrameMessage, address: &Address) {
    msg.push(Frame::begin());
    let mut initial = BytesMut::zeroed(ADDRESS_INITIAL_FRAME_SIZE);
    encode_i32(&mut initial, ADDRESS_PORT_FIELD_OFFSET, i32::from(address.port()));
    msg.push(Frame::new(initial.freeze()));
    encode_string(msg, address.host());
    msg.push(Frame::end());
}

pub fn decode_address(iter: &mut FrameIter<'_>) -> Result<Address, NetError> {
    iter.expect_begin()?;
    let initial = iter.next_frame()?;
    let port = decode_i32(&initial.content, ADDRESS_PORT_FIELD_OFFSET)?;
    let port = u16::try_from(port).map_err(|_| NetError::Frame(format!("invalid port {port}")))?;
    let host = decode_string(iter)?;
    iter.fast_forward_to_end()?;
    Ok(Address::new(host, port))
}

const MEMBER_NODE_ID_FIELD_OFFSET: usize = 0;
const MEMBER_GENERATION_FIELD_OFFSET: usize = MEMBER_NODE_ID_FIELD_OFFSET + NODE_ID_SIZE_IN_BYTES;
const MEMBER_INITIAL_FRAME_SIZE: usize = MEMBER_GENERATION_FIELD_OFFSET + LONG_SIZE_IN_BYTES;

pub fn encode_member(msg: &mut FrameMessage, member: &Member) {
    msg.push(Frame::begin());
    let mut initial = BytesMut::zeroed(MEMBER_INITIAL_FRAME_SIZE);
    encode_node_id(&mut initial, MEMBER_NODE_ID_FIELD_OFFSET, &member.node_id);
    encode_i64(&mut initial, MEMBER_GENERATION_FIELD_OFFSET, member.generation as i64);
    msg.push(Frame::new(initial.freeze()));
    encode_address(msg, &member.address);
    msg.push(Frame::end());
}

pub fn decode_member(iter: &mut FrameIter<'_>) -> Result<Member, NetError> {
    iter.expect_begin()?;
    let initial = iter.next_frame()?;
    let node_id = decode_node_id(&initial.content, MEMBER_NODE_ID_FIELD_OFFSET)?;
    let generation = decode_i64(&initial.content, MEMBER_GENERATION_FIELD_OFFSET)? as u64;
    let address = decode_address(iter)?;
    iter.fast_forward_to_end()?;
    Ok(Member {
        node_id,
        address,
        generation,
    })
}

const VIEW_VERSION_FIELD_OFFSET: usize = 0;
const VIEW_INITIAL_FRAME_SIZE: usize = VIEW_VERSION_FIELD_OFFSET + INT_SIZE_IN_BYTES;

pub fn encode_member_view(msg: &mut FrameMessage, view: &MemberView) {
    msg.push(Frame::begin());
    let mut initial = BytesMut::zeroed(VIEW_INITIAL_FRAME_SIZE);
    encode_i32(&mut initial, VIEW_VERSION_FIELD_OFFSET, view.version as i32);
    msg.push(Frame::new(initial.freeze()));
    encode_address(msg, &view.master);
    encode_list(msg, &view.members, encode_member);
    msg.push(Frame::end());
}

pub fn decode_member_view(iter: &mut FrameIter<'_>) -> Result<MemberView, NetError> {
    iter.expect_begin()?;
    let initial = iter.next_frame()?;
    let version = decode_i32(&initial.content, VIEW_VERSION_FIELD_OFFSET)? as u32;
    let master = decode_address(iter)?;
    let members = decode_list(iter, decode_member)?;
    iter.fast_forward_to_end()?;
    Ok(MemberView {
        version,
        master,
        members,
    })
}

//! Wire binary protocol for HyParView control messages and application
//! payloads, as described in:
//! https://asc.di.fct.unl.pt/~jleitao/pdf/dsn07-leitao.pdf
//! by Joao Leitao et al.
//!
//! All integers are big-endian. Every frame starts with a one-byte type tag
//! followed by a type-specific payload. [`Codec`] turns a byte stream into a
//! lazy sequence of [`Frame`]s, leaving a trailing incomplete frame in the
//! buffer for the next read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::id::{Id, ID_WIRE_SIZE};

const TAG_JOIN: u8 = b'J';
const TAG_FORWARD_JOIN: u8 = b'F';
const TAG_JOIN_REPLY: u8 = b'R';
const TAG_HNEIGHBOUR: u8 = b'H';
const TAG_LNEIGHBOUR: u8 = b'L';
const TAG_ACCEPT: u8 = b'A';
const TAG_DECLINE: u8 = b'D';
const TAG_DISCONNECT: u8 = b'X';
const TAG_SHUFFLE: u8 = b'S';
const TAG_SHUFFLE_REPLY: u8 = b'Y';
const TAG_MESSAGE: u8 = b'M';

/// Maximum number of identifiers an xlist may carry; it is wire-encoded in
/// a single length byte.
pub const MAX_XLIST_LEN: usize = u8::MAX as usize;

/// A decoded HyParView control or application frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Join(Id),
    ForwardJoin { new: Id, ttl: u8 },
    JoinReply(Id),
    HNeighbour(Id),
    LNeighbour(Id),
    Accept,
    Decline,
    Disconnect,
    Shuffle { requester: Id, ttl: u8, xlist: Vec<Id> },
    ShuffleReply { xlist: Vec<Id> },
    Message(Bytes),
}

impl Frame {
    /// The wire type tag this frame encodes as, for diagnostics such as
    /// [`ProtocolError::UnexpectedReply`].
    pub fn tag(&self) -> u8 {
        match self {
            Frame::Join(_) => TAG_JOIN,
            Frame::ForwardJoin { .. } => TAG_FORWARD_JOIN,
            Frame::JoinReply(_) => TAG_JOIN_REPLY,
            Frame::HNeighbour(_) => TAG_HNEIGHBOUR,
            Frame::LNeighbour(_) => TAG_LNEIGHBOUR,
            Frame::Accept => TAG_ACCEPT,
            Frame::Decline => TAG_DECLINE,
            Frame::Disconnect => TAG_DISCONNECT,
            Frame::Shuffle { .. } => TAG_SHUFFLE,
            Frame::ShuffleReply { .. } => TAG_SHUFFLE_REPLY,
            Frame::Message(_) => TAG_MESSAGE,
        }
    }

    fn encode_xlist(xlist: &[Id], out: &mut BytesMut) -> Result<(), ProtocolError> {
        if xlist.len() > MAX_XLIST_LEN {
            return Err(ProtocolError::XListTooLong(xlist.len()));
        }
        out.put_u8(xlist.len() as u8);
        let mut buf = Vec::with_capacity(xlist.len() * ID_WIRE_SIZE);
        for id in xlist {
            id.encode(&mut buf);
        }
        out.put_slice(&buf);
        Ok(())
    }
}

/// Tokio codec implementing the grammar above over `BytesMut`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec;

impl Encoder<Frame> for Codec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Frame::Join(id) => {
                dst.put_u8(TAG_JOIN);
                let mut buf = Vec::new();
                id.encode(&mut buf);
                dst.put_slice(&buf);
            }
            Frame::ForwardJoin { new, ttl } => {
                dst.put_u8(TAG_FORWARD_JOIN);
                let mut buf = Vec::new();
                new.encode(&mut buf);
                dst.put_slice(&buf);
                dst.put_u8(ttl);
            }
            Frame::JoinReply(id) => {
                dst.put_u8(TAG_JOIN_REPLY);
                let mut buf = Vec::new();
                id.encode(&mut buf);
                dst.put_slice(&buf);
            }
            Frame::HNeighbour(id) => {
                dst.put_u8(TAG_HNEIGHBOUR);
                let mut buf = Vec::new();
                id.encode(&mut buf);
                dst.put_slice(&buf);
            }
            Frame::LNeighbour(id) => {
                dst.put_u8(TAG_LNEIGHBOUR);
                let mut buf = Vec::new();
                id.encode(&mut buf);
                dst.put_slice(&buf);
            }
            Frame::Accept => dst.put_u8(TAG_ACCEPT),
            Frame::Decline => dst.put_u8(TAG_DECLINE),
            Frame::Disconnect => dst.put_u8(TAG_DISCONNECT),
            Frame::Shuffle { requester, ttl, xlist } => {
                dst.put_u8(TAG_SHUFFLE);
                let mut buf = Vec::new();
                requester.encode(&mut buf);
                dst.put_slice(&buf);
                dst.put_u8(ttl);
                Frame::encode_xlist(&xlist, dst)?;
            }
            Frame::ShuffleReply { xlist } => {
                dst.put_u8(TAG_SHUFFLE_REPLY);
                Frame::encode_xlist(&xlist, dst)?;
            }
            Frame::Message(payload) => {
                dst.put_u8(TAG_MESSAGE);
                dst.put_u32(payload.len() as u32);
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

impl Decoder for Codec {
    type Error = ProtocolError;
    type Item = Frame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let tag = src[0];

        // Minimum bytes needed for each frame shape, given just the tag.
        let id_frame = |src: &mut BytesMut, make: fn(Id) -> Frame| -> Result<Option<Frame>, ProtocolError> {
            if src.len() < 1 + ID_WIRE_SIZE {
                return Ok(None);
            }
            src.advance(1);
            let id = Id::decode(&src.split_to(ID_WIRE_SIZE)).expect("length checked above");
            Ok(Some(make(id)))
        };

        match tag {
            TAG_JOIN => id_frame(src, Frame::Join),
            TAG_JOIN_REPLY => id_frame(src, Frame::JoinReply),
            TAG_HNEIGHBOUR => id_frame(src, Frame::HNeighbour),
            TAG_LNEIGHBOUR => id_frame(src, Frame::LNeighbour),
            TAG_ACCEPT => {
                src.advance(1);
                Ok(Some(Frame::Accept))
            }
            TAG_DECLINE => {
                src.advance(1);
                Ok(Some(Frame::Decline))
            }
            TAG_DISCONNECT => {
                src.advance(1);
                Ok(Some(Frame::Disconnect))
            }
            TAG_FORWARD_JOIN => {
                if src.len() < 1 + ID_WIRE_SIZE + 1 {
                    return Ok(None);
                }
                src.advance(1);
                let new = Id::decode(&src.split_to(ID_WIRE_SIZE)).expect("length checked above");
                let ttl = src.get_u8();
                Ok(Some(Frame::ForwardJoin { new, ttl }))
            }
            TAG_SHUFFLE => {
                if src.len() < 1 + ID_WIRE_SIZE + 1 + 1 {
                    return Ok(None);
                }
                let len = src[1 + ID_WIRE_SIZE + 1] as usize;
                let needed = 1 + ID_WIRE_SIZE + 1 + 1 + len * ID_WIRE_SIZE;
                if src.len() < needed {
                    return Ok(None);
                }
                src.advance(1);
                let requester = Id::decode(&src.split_to(ID_WIRE_SIZE)).expect("length checked above");
                let ttl = src.get_u8();
                let xlist_len = src.get_u8() as usize;
                let xlist = decode_xlist(src, xlist_len)?;
                Ok(Some(Frame::Shuffle { requester, ttl, xlist }))
            }
            TAG_SHUFFLE_REPLY => {
                if src.len() < 1 + 1 {
                    return Ok(None);
                }
                let len = src[1] as usize;
                let needed = 1 + 1 + len * ID_WIRE_SIZE;
                if src.len() < needed {
                    return Ok(None);
                }
                src.advance(1);
                let xlist_len = src.get_u8() as usize;
                let xlist = decode_xlist(src, xlist_len)?;
                Ok(Some(Frame::ShuffleReply { xlist }))
            }
            TAG_MESSAGE => {
                if src.len() < 1 + 4 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
                let needed = 1 + 4 + len;
                if src.len() < needed {
                    return Ok(None);
                }
                src.advance(1 + 4);
                let payload = src.split_to(len).freeze();
                Ok(Some(Frame::Message(payload)))
            }
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }

    /// The stream closed with an incomplete frame sitting in the buffer:
    /// distinct from the "wait for more bytes" `Ok(None)` a partial frame
    /// produces mid-stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::Truncated),
        }
    }
}

fn decode_xlist(src: &mut BytesMut, len: usize) -> Result<Vec<Id>, ProtocolError> {
    let mut xlist = Vec::with_capacity(len);
    for _ in 0..len {
        let chunk = src.split_to(ID_WIRE_SIZE);
        xlist.push(Id::decode(&chunk).expect("length checked by caller"));
    }
    Ok(xlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn id(a: u8, b: u8, c: u8, d: u8, port: u16) -> Id {
        Id::new(Ipv4Addr::new(a, b, c, d), port)
    }

    fn round_trip(frame: Frame) {
        let mut codec = Codec;
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trips_every_frame_shape() {
        round_trip(Frame::Join(id(127, 0, 0, 1, 7001)));
        round_trip(Frame::ForwardJoin { new: id(10, 0, 0, 1, 1), ttl: 3 });
        round_trip(Frame::JoinReply(id(10, 0, 0, 2, 2)));
        round_trip(Frame::HNeighbour(id(10, 0, 0, 3, 3)));
        round_trip(Frame::LNeighbour(id(10, 0, 0, 4, 4)));
        round_trip(Frame::Accept);
        round_trip(Frame::Decline);
        round_trip(Frame::Disconnect);
        round_trip(Frame::Shuffle {
            requester: id(1, 2, 3, 4, 5),
            ttl: 2,
            xlist: vec![id(1, 1, 1, 1, 1), id(2, 2, 2, 2, 2)],
        });
        round_trip(Frame::ShuffleReply { xlist: vec![id(9, 9, 9, 9, 9)] });
        round_trip(Frame::Message(Bytes::from_static(b"hello")));
        round_trip(Frame::Shuffle { requester: id(0, 0, 0, 0, 0), ttl: 0, xlist: vec![] });
    }

    #[test]
    fn leaves_incomplete_frame_in_buffer() {
        let mut codec = Codec;
        let mut full = BytesMut::new();
        codec.encode(Frame::Join(id(127, 0, 0, 1, 1)), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), full.len() - 1);
    }

    #[test]
    fn decode_eof_rejects_trailing_partial_frame() {
        let mut codec = Codec;
        let mut full = BytesMut::new();
        codec.encode(Frame::Join(id(127, 0, 0, 1, 1)), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(matches!(codec.decode_eof(&mut partial), Err(ProtocolError::Truncated)));

        let mut empty = BytesMut::new();
        assert_eq!(codec.decode_eof(&mut empty).unwrap(), None);
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut codec = Codec;
        let mut buf = BytesMut::from(&b"?"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(ProtocolError::UnknownFrameType(b'?'))));
    }

    #[test]
    fn rejects_oversized_xlist_on_encode() {
        let mut codec = Codec;
        let mut buf = BytesMut::new();
        let xlist = vec![id(0, 0, 0, 0, 0); MAX_XLIST_LEN + 1];
        let err = codec.encode(Frame::ShuffleReply { xlist }, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::XListTooLong(_)));
    }
}

use std::fmt::{Debug, Formatter};
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::safe_converter::PrecheckedCast;
use crate::seq_space::SeqNo;

/// Numeric fields are sent as a single character, offset from this base
pub const ENCODING_BASE: u8 = b'a';
/// Largest character used for encoded numeric fields
pub const ENCODING_MAX: u8 = b'~';

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DatagramKind {
    Data = b'D',
    Ack = b'A',
}

/// Receiver feedback: everything up to and including `seq_no` arrived in order, and there is
///  room for `empty_space` more messages.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AckInfo {
    pub seq_no: SeqNo,
    pub empty_space: usize,
}

#[derive(Clone, Eq, PartialEq)]
pub enum Datagram {
    Data { seq_no: SeqNo, payload: Bytes },
    Ack(AckInfo),
}
impl Debug for Datagram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Datagram::Data { seq_no, payload } => write!(f, "DATA{{#{}:{}b}}", seq_no, payload.len()),
            Datagram::Ack(ack) => write!(f, "ACK{{#{}+{}}}", ack.seq_no, ack.empty_space),
        }
    }
}

impl Datagram {
    pub const HEADER_LEN: usize = 2;
    pub const ACK_LEN: usize = 3;

    pub fn kind(&self) -> DatagramKind {
        match self {
            Datagram::Data { .. } => DatagramKind::Data,
            Datagram::Ack(_) => DatagramKind::Ack,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind().into());
        match self {
            Datagram::Data { seq_no, payload } => {
                buf.put_u8(encode_field(*seq_no));
                buf.put_slice(payload);
            }
            Datagram::Ack(ack) => {
                buf.put_u8(encode_field(ack.seq_no));
                buf.put_u8(encode_field(ack.empty_space));
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Datagram> {
        let kind = match DatagramKind::try_from(buf.try_get_u8()?) {
            Ok(kind) => kind,
            Err(e) => bail!("unknown datagram tag {}", e.number),
        };

        match kind {
            DatagramKind::Data => {
                let seq_no = decode_field(buf.try_get_u8()?)?;
                let payload = buf.copy_to_bytes(buf.remaining());
                Ok(Datagram::Data { seq_no, payload })
            }
            DatagramKind::Ack => {
                let seq_no = decode_field(buf.try_get_u8()?)?;
                let empty_space = decode_field(buf.try_get_u8()?)?;
                Ok(Datagram::Ack(AckInfo { seq_no, empty_space }))
            }
        }
    }
}

fn encode_field(value: usize) -> u8 {
    let value: u8 = value.prechecked_cast();
    ENCODING_BASE + value
}

fn decode_field(raw: u8) -> anyhow::Result<usize> {
    if !(ENCODING_BASE..=ENCODING_MAX).contains(&raw) {
        bail!("encoded field {} is outside the range [{}, {}]", raw, ENCODING_BASE, ENCODING_MAX);
    }
    Ok((raw - ENCODING_BASE) as usize)
}

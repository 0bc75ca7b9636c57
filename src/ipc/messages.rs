use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::error::MtpError;
use crate::liveness::OwnerId;
use crate::safe_converter::PrecheckedCast;
use crate::table::ConnectionId;

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum RequestKind {
    Open = 1,
    Bind = 2,
    Send = 3,
    Receive = 4,
    Close = 5,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum Status {
    Done = 0,
    Opened = 1,
    Payload = 2,

    NoFreeSlot = 16,
    InvalidConnection = 17,
    AlreadyBound = 18,
    NotConnected = 19,
    BufferFull = 20,
    MessageTooLong = 21,
    NoMessage = 22,
    Transport = 23,
    ControlPlaneClosed = 24,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum AddrKind {
    None = 0,
    V4 = 4,
    V6 = 6,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IpcRequestBody {
    Open,
    Bind { id: ConnectionId, local: SocketAddr, peer: SocketAddr },
    Send { id: ConnectionId, dest: SocketAddr, payload: Bytes },
    Receive { id: ConnectionId },
    Close { id: ConnectionId },
}

/// A request from a client process. The owner is the client's process id, which is what the
///  node probes to reclaim the connections of clients that terminated.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IpcRequest {
    pub request_id: u32,
    pub owner: OwnerId,
    pub body: IpcRequestBody,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum IpcResponseBody {
    Done,
    Opened(ConnectionId),
    Payload(Bytes),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IpcResponse {
    pub request_id: u32,
    pub result: Result<IpcResponseBody, MtpError>,
}

impl IpcRequest {
    pub fn ser(&self, buf: &mut BytesMut) {
        let kind = match &self.body {
            IpcRequestBody::Open => RequestKind::Open,
            IpcRequestBody::Bind { .. } => RequestKind::Bind,
            IpcRequestBody::Send { .. } => RequestKind::Send,
            IpcRequestBody::Receive { .. } => RequestKind::Receive,
            IpcRequestBody::Close { .. } => RequestKind::Close,
        };
        buf.put_u8(kind.into());
        buf.put_u32(self.request_id);
        buf.put_u32(self.owner);

        match &self.body {
            IpcRequestBody::Open => {}
            IpcRequestBody::Bind { id, local, peer } => {
                ser_id(*id, buf);
                ser_addr(Some(*local), buf);
                ser_addr(Some(*peer), buf);
            }
            IpcRequestBody::Send { id, dest, payload } => {
                ser_id(*id, buf);
                ser_addr(Some(*dest), buf);
                ser_bytes(payload, buf);
            }
            IpcRequestBody::Receive { id } | IpcRequestBody::Close { id } => {
                ser_id(*id, buf);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<IpcRequest> {
        let kind = match RequestKind::try_from(buf.try_get_u8()?) {
            Ok(kind) => kind,
            Err(e) => bail!("unknown request kind {}", e.number),
        };
        let request_id = buf.try_get_u32()?;
        let owner = buf.try_get_u32()?;

        let body = match kind {
            RequestKind::Open => IpcRequestBody::Open,
            RequestKind::Bind => IpcRequestBody::Bind {
                id: deser_id(buf)?,
                local: deser_required_addr(buf)?,
                peer: deser_required_addr(buf)?,
            },
            RequestKind::Send => IpcRequestBody::Send {
                id: deser_id(buf)?,
                dest: deser_required_addr(buf)?,
                payload: deser_bytes(buf)?,
            },
            RequestKind::Receive => IpcRequestBody::Receive { id: deser_id(buf)? },
            RequestKind::Close => IpcRequestBody::Close { id: deser_id(buf)? },
        };

        Ok(IpcRequest { request_id, owner, body })
    }
}

impl IpcResponse {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.request_id);

        match &self.result {
            Ok(IpcResponseBody::Done) => buf.put_u8(Status::Done.into()),
            Ok(IpcResponseBody::Opened(id)) => {
                buf.put_u8(Status::Opened.into());
                ser_id(*id, buf);
            }
            Ok(IpcResponseBody::Payload(payload)) => {
                buf.put_u8(Status::Payload.into());
                ser_bytes(payload, buf);
            }
            Err(MtpError::NoFreeSlot) => buf.put_u8(Status::NoFreeSlot.into()),
            Err(MtpError::InvalidConnection(id)) => {
                buf.put_u8(Status::InvalidConnection.into());
                ser_id(*id, buf);
            }
            Err(MtpError::AlreadyBound(id)) => {
                buf.put_u8(Status::AlreadyBound.into());
                ser_id(*id, buf);
            }
            Err(MtpError::NotConnected { expected, actual }) => {
                buf.put_u8(Status::NotConnected.into());
                ser_addr(*expected, buf);
                ser_addr(Some(*actual), buf);
            }
            Err(MtpError::BufferFull) => buf.put_u8(Status::BufferFull.into()),
            Err(MtpError::MessageTooLong { len, max }) => {
                buf.put_u8(Status::MessageTooLong.into());
                buf.put_usize_varint(*len);
                buf.put_usize_varint(*max);
            }
            Err(MtpError::NoMessage) => buf.put_u8(Status::NoMessage.into()),
            Err(MtpError::Transport(msg)) => {
                buf.put_u8(Status::Transport.into());
                ser_bytes(msg.as_bytes(), buf);
            }
            Err(MtpError::ControlPlaneClosed) => buf.put_u8(Status::ControlPlaneClosed.into()),
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<IpcResponse> {
        let request_id = buf.try_get_u32()?;
        let status = match Status::try_from(buf.try_get_u8()?) {
            Ok(status) => status,
            Err(e) => bail!("unknown response status {}", e.number),
        };

        let result = match status {
            Status::Done => Ok(IpcResponseBody::Done),
            Status::Opened => Ok(IpcResponseBody::Opened(deser_id(buf)?)),
            Status::Payload => Ok(IpcResponseBody::Payload(deser_bytes(buf)?)),
            Status::NoFreeSlot => Err(MtpError::NoFreeSlot),
            Status::InvalidConnection => Err(MtpError::InvalidConnection(deser_id(buf)?)),
            Status::AlreadyBound => Err(MtpError::AlreadyBound(deser_id(buf)?)),
            Status::NotConnected => Err(MtpError::NotConnected {
                expected: deser_addr(buf)?,
                actual: deser_required_addr(buf)?,
            }),
            Status::BufferFull => Err(MtpError::BufferFull),
            Status::MessageTooLong => Err(MtpError::MessageTooLong {
                len: buf.try_get_usize_varint()?,
                max: buf.try_get_usize_varint()?,
            }),
            Status::NoMessage => Err(MtpError::NoMessage),
            Status::Transport => {
                let raw = deser_bytes(buf)?;
                Err(MtpError::Transport(String::from_utf8_lossy(&raw).into_owned()))
            }
            Status::ControlPlaneClosed => Err(MtpError::ControlPlaneClosed),
        };

        Ok(IpcResponse { request_id, result })
    }
}

fn ser_id(id: ConnectionId, buf: &mut BytesMut) {
    buf.put_u16(id.prechecked_cast());
}

fn deser_id(buf: &mut impl Buf) -> anyhow::Result<ConnectionId> {
    Ok(buf.try_get_u16()? as ConnectionId)
}

fn ser_addr(addr: Option<SocketAddr>, buf: &mut BytesMut) {
    match addr {
        None => buf.put_u8(AddrKind::None.into()),
        Some(SocketAddr::V4(addr)) => {
            buf.put_u8(AddrKind::V4.into());
            buf.put_u32(addr.ip().to_bits());
            buf.put_u16(addr.port());
        }
        Some(SocketAddr::V6(addr)) => {
            buf.put_u8(AddrKind::V6.into());
            buf.put_u128(addr.ip().to_bits());
            buf.put_u16(addr.port());
        }
    }
}

fn deser_addr(buf: &mut impl Buf) -> anyhow::Result<Option<SocketAddr>> {
    let kind = match AddrKind::try_from(buf.try_get_u8()?) {
        Ok(kind) => kind,
        Err(e) => bail!("unknown address kind {}", e.number),
    };

    Ok(match kind {
        AddrKind::None => None,
        AddrKind::V4 => Some(SocketAddrV4::new(buf.try_get_u32()?.into(), buf.try_get_u16()?).into()),
        AddrKind::V6 => Some(SocketAddrV6::new(buf.try_get_u128()?.into(), buf.try_get_u16()?, 0, 0).into()),
    })
}

fn deser_required_addr(buf: &mut impl Buf) -> anyhow::Result<SocketAddr> {
    match deser_addr(buf)? {
        Some(addr) => Ok(addr),
        None => bail!("missing address"),
    }
}

fn ser_bytes(data: &[u8], buf: &mut BytesMut) {
    buf.put_usize_varint(data.len());
    buf.put_slice(data);
}

fn deser_bytes(buf: &mut impl Buf) -> anyhow::Result<Bytes> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("expected {} bytes, only {} remaining", len, buf.remaining());
    }
    Ok(buf.copy_to_bytes(len))
}

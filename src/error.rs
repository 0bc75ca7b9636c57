use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use crate::table::ConnectionId;

/// Failures reported to clients of the connection API.
///
/// Protocol level anomalies (out-of-window data, stale acks, undecodable datagrams) are never
///  reported here: they are dropped silently and healed by retransmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtpError {
    NoFreeSlot,
    InvalidConnection(ConnectionId),
    AlreadyBound(ConnectionId),
    NotConnected { expected: Option<SocketAddr>, actual: SocketAddr },
    BufferFull,
    MessageTooLong { len: usize, max: usize },
    NoMessage,
    Transport(String),
    ControlPlaneClosed,
}

impl MtpError {
    /// Conditions that go away by themselves when the caller tries again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, MtpError::NoFreeSlot | MtpError::BufferFull | MtpError::NoMessage)
    }
}

impl Display for MtpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MtpError::NoFreeSlot => write!(f, "no free connection slot"),
            MtpError::InvalidConnection(id) => write!(f, "connection {} is not allocated", id),
            MtpError::AlreadyBound(id) => write!(f, "connection {} is already bound", id),
            MtpError::NotConnected { expected: Some(expected), actual } => write!(f, "connection is bound to {}, not to {}", expected, actual),
            MtpError::NotConnected { expected: None, actual } => write!(f, "connection is not bound (destination {})", actual),
            MtpError::BufferFull => write!(f, "send buffer is full"),
            MtpError::MessageTooLong { len, max } => write!(f, "message has {} bytes, maximum is {}", len, max),
            MtpError::NoMessage => write!(f, "no message available"),
            MtpError::Transport(msg) => write!(f, "transport error: {}", msg),
            MtpError::ControlPlaneClosed => write!(f, "control plane is shut down"),
        }
    }
}

impl std::error::Error for MtpError {}

impl From<std::io::Error> for MtpError {
    fn from(value: std::io::Error) -> Self {
        MtpError::Transport(value.to_string())
    }
}

pub type MtpResult<T> = Result<T, MtpError>;

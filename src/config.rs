use std::time::Duration;
use anyhow::bail;
use crate::wire::{ENCODING_BASE, ENCODING_MAX};

/// Upper bound for the payload size, leaving room for MTP's header in a UDP datagram and for
///  the request header when the payload is passed through IPC
pub const MAX_PAYLOAD_SIZE: usize = 65_000;

#[derive(Debug, Clone)]
pub struct MtpConfig {
    /// The number of connection slots in the table. This is fixed when the node starts, and
    ///  `open` fails once all slots are allocated.
    pub table_size: usize,

    /// Number of messages a connection's send buffer holds, both in flight and queued for
    ///  transmission.
    pub send_buffer_size: usize,

    /// Number of messages a connection's receive buffer holds. This is also the initial window
    ///  the sender assumes for the peer, so both sides of a connection must agree on it.
    ///
    /// It must stay below half the sequence number ring: otherwise the half-ring comparison can
    ///  not tell old from new sequence numbers inside one window.
    pub recv_buffer_size: usize,

    /// Sequence numbers run from 1 to this value (inclusive) and then wrap around.
    pub max_seq_no: usize,

    /// Fixed payload size of data datagrams. Shorter messages are zero padded, longer messages
    ///  are rejected.
    pub payload_size: usize,

    /// Probability in `[0, 1]` for dropping an incoming datagram before it is processed. This
    ///  is a fault injection knob for testing and should be 0 in production.
    pub drop_probability: f64,

    /// Upper bound for a single wait of the receive engine for incoming datagrams. Window
    ///  update probes are sent at this granularity.
    pub poll_timeout: Duration,

    /// Unacknowledged data is retransmitted after this time. The send engine runs twice per
    ///  timeout.
    pub retransmit_timeout: Duration,

    /// Interval for checking whether the processes owning connections are still alive.
    pub reclamation_interval: Duration,
}

impl Default for MtpConfig {
    fn default() -> Self {
        MtpConfig {
            table_size: 25,
            send_buffer_size: 10,
            recv_buffer_size: 5,
            max_seq_no: 16,
            payload_size: 1000,
            drop_probability: 0.0,
            poll_timeout: Duration::from_secs(4),
            retransmit_timeout: Duration::from_secs(5),
            reclamation_interval: Duration::from_secs(200),
        }
    }
}

impl MtpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.table_size == 0 {
            bail!("connection table must have at least one slot");
        }
        if self.table_size > u16::MAX as usize {
            bail!("connection table size {} exceeds the maximum of {}", self.table_size, u16::MAX);
        }
        if self.send_buffer_size == 0 || self.recv_buffer_size == 0 {
            bail!("send and receive buffers must hold at least one message");
        }

        let max_encodable = (ENCODING_MAX - ENCODING_BASE) as usize;
        if self.max_seq_no > max_encodable {
            bail!("sequence number ring size {} can not be encoded in a single character (max {})", self.max_seq_no, max_encodable);
        }
        if self.recv_buffer_size > max_encodable {
            bail!("receive buffer size {} can not be encoded in a single character (max {})", self.recv_buffer_size, max_encodable);
        }
        if 2 * self.recv_buffer_size >= self.max_seq_no {
            bail!("receive buffer size {} must be less than half the sequence number ring size {}", self.recv_buffer_size, self.max_seq_no);
        }
        if self.recv_buffer_size > self.send_buffer_size {
            bail!("receive buffer size {} exceeds send buffer size {}", self.recv_buffer_size, self.send_buffer_size);
        }

        if self.payload_size == 0 {
            bail!("payload size must not be 0");
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            bail!("payload size {} exceeds the maximum of {}", self.payload_size, MAX_PAYLOAD_SIZE);
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            bail!("drop probability must be in [0, 1], was {}", self.drop_probability);
        }

        if self.poll_timeout.is_zero() || self.retransmit_timeout.is_zero() || self.reclamation_interval.is_zero() {
            bail!("timing parameters must be positive");
        }
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        self.retransmit_timeout / 2
    }
}

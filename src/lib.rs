//! MTP is a message transport providing reliable, ordered delivery of bounded-size messages on
//!  top of UDP. A node manages a fixed table of connections, each connecting one local UDP
//!  address to one peer.
//!
//! Every connection keeps a send buffer and a receive buffer. The sender transmits within a
//!  sliding window over a circular sequence number space (`1..=max_seq_no`), and the receiver
//!  acknowledges cumulatively, advertising how much space it has left. A sender that does not
//!  see an ack in time retransmits its entire window (go-back-N). A receiver that advertised a
//!  full buffer announces freed space with a repeated window update.
//!
//! Datagrams:
//! ```ascii
//! Data:  'D' | seq no          | payload (up to payload_size bytes)
//! Ack:   'A' | cumulative seq  | empty space
//! ```
//!
//! Numeric fields are single bytes, offset from `'a'`, so that a value must not exceed 29.
//!  Sequence number 0 is never used for data: an ack for 0 means "nothing received yet".

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod control;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod liveness;
pub mod loss;
pub mod node;
pub mod safe_converter;
pub mod seq_space;
pub mod table;
pub mod transport;
pub mod wire;

#[cfg(test)]
pub mod test_util;

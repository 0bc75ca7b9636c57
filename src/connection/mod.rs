use bytes::Bytes;
use tokio::sync::Mutex;
use crate::config::MtpConfig;
use crate::connection::recv_side::RecvSide;
use crate::connection::send_side::SendSide;
use crate::seq_space::SeqNo;

pub mod recv_side;
pub mod send_side;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub seq_no: SeqNo,
    pub payload: Bytes,
}

/// The protocol state of a connection. Send side and receive side are guarded by separate locks
///  so that ack processing, data processing and the application's enqueue / dequeue calls do not
///  contend more than necessary.
///
/// When both locks are needed, the send side is locked first.
pub struct ConnectionState {
    pub send: Mutex<SendSide>,
    pub recv: Mutex<RecvSide>,
}

impl ConnectionState {
    pub fn new(config: &MtpConfig) -> ConnectionState {
        ConnectionState {
            send: Mutex::new(SendSide::new(config.send_buffer_size, config.recv_buffer_size, config.max_seq_no, config.payload_size)),
            recv: Mutex::new(RecvSide::new(config.recv_buffer_size, config.max_seq_no)),
        }
    }

    /// Brings both windows and buffers back to their initial state
    pub async fn reset(&self) {
        let mut send = self.send.lock().await;
        let mut recv = self.recv.lock().await;
        send.reset();
        recv.reset();
    }
}

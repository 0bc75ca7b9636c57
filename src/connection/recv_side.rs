use bit_set::BitSet;
use bytes::Bytes;
use tracing::{debug, trace};
use crate::connection::BufferedMessage;
use crate::error::{MtpError, MtpResult};
use crate::seq_space::{next_seq, SeqNo};
use crate::wire::AckInfo;

/// Receive buffer and receive window of a single connection.
///
/// Incoming messages are stored in any free slot of the buffer, and they are handed to the
///  application strictly in sequence number order. The window lists the sequence numbers that
///  are currently accepted: the next `empty_space` numbers after `last_inorder_received` that are
///  not buffered yet. It is derived from buffer occupancy and `last_inorder_received` alone, and
///  it is recalculated whenever either changes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecvSide {
    ring: usize,
    buffer: Vec<Option<BufferedMessage>>,
    /// sequence numbers that are currently in `buffer`
    buffered: BitSet,

    window: Vec<Option<SeqNo>>,
    last_inorder_received: SeqNo,
    last_user_taken: SeqNo,
    nospace: bool,
}

impl RecvSide {
    pub fn new(capacity: usize, ring: usize) -> RecvSide {
        let mut result = RecvSide {
            ring,
            buffer: vec![None; capacity],
            buffered: BitSet::with_capacity(ring + 1),
            window: vec![None; capacity],
            last_inorder_received: 0,
            last_user_taken: 0,
            nospace: false,
        };
        result.reset();
        result
    }

    pub fn reset(&mut self) {
        self.buffer.fill(None);
        self.buffered.make_empty();
        self.last_inorder_received = 0;
        self.last_user_taken = 0;
        self.nospace = false;
        self.refresh_window();
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn empty_space(&self) -> usize {
        self.capacity() - self.buffered.count()
    }

    pub fn window(&self) -> &[Option<SeqNo>] {
        &self.window
    }

    pub fn is_in_window(&self, seq_no: SeqNo) -> bool {
        self.window.contains(&Some(seq_no))
    }

    pub fn nospace(&self) -> bool {
        self.nospace
    }

    fn current_ack(&self) -> AckInfo {
        AckInfo {
            seq_no: self.last_inorder_received,
            empty_space: self.empty_space(),
        }
    }

    fn refresh_window(&mut self) {
        let empty_space = self.empty_space();

        self.window.clear();
        let mut candidate = self.last_inorder_received;
        while self.window.len() < empty_space {
            candidate = next_seq(candidate, self.ring);
            if !self.buffered.contains(candidate) {
                self.window.push(Some(candidate));
            }
        }
        self.window.resize(self.capacity(), None);
    }

    fn advance_last_inorder(&mut self) {
        while self.buffered.contains(next_seq(self.last_inorder_received, self.ring)) {
            self.last_inorder_received = next_seq(self.last_inorder_received, self.ring);
        }
    }

    /// Handles an incoming data message, returning the ack to send back to the peer. An ack is
    ///  returned whether or not the message was accepted.
    pub fn on_data(&mut self, seq_no: SeqNo, payload: Bytes) -> (bool, AckInfo) {
        let free_slot = if self.is_in_window(seq_no) {
            self.buffer.iter().position(|slot| slot.is_none())
        }
        else {
            None
        };

        let accepted = match free_slot {
            Some(idx) => {
                self.buffer[idx] = Some(BufferedMessage { seq_no, payload });
                self.buffered.insert(seq_no);
                trace!("buffered message #{} in slot {}", seq_no, idx);

                self.advance_last_inorder();
                self.refresh_window();
                true
            }
            None => {
                debug!("message #{} is outside the receive window {:?} - discarding", seq_no, self.window);
                false
            }
        };

        let ack = self.current_ack();
        if ack.empty_space == 0 {
            self.nospace = true;
        }
        else if self.nospace && accepted {
            self.nospace = false;
        }
        (accepted, ack)
    }

    /// Returns a window update if the last ack advertised no free space and the application
    ///  has since freed some. The flag stays set until new data arrives, so this keeps returning
    ///  an ack until the peer starts sending again.
    pub fn window_update_probe(&mut self) -> Option<AckInfo> {
        if !self.nospace {
            return None;
        }

        self.refresh_window();
        let ack = self.current_ack();
        if ack.empty_space == 0 {
            return None;
        }
        Some(ack)
    }

    /// Hands the next in-order message to the application
    pub fn dequeue(&mut self) -> MtpResult<Bytes> {
        let wanted = next_seq(self.last_user_taken, self.ring);
        if !self.buffered.contains(wanted) {
            return Err(MtpError::NoMessage);
        }

        let idx = self.buffer.iter()
            .position(|slot| matches!(slot, Some(m) if m.seq_no == wanted))
            .ok_or(MtpError::NoMessage)?;

        let message = self.buffer[idx].take().ok_or(MtpError::NoMessage)?;
        self.buffered.remove(wanted);
        self.last_user_taken = wanted;
        self.refresh_window();

        trace!("delivered message #{} to the application", wanted);
        Ok(message.payload)
    }
}

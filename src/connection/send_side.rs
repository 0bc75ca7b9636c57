use bytes::BytesMut;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use crate::connection::BufferedMessage;
use crate::error::{MtpError, MtpResult};
use crate::seq_space::{is_ahead, next_seq, SeqNo};
use crate::wire::{AckInfo, Datagram};

/// How an incoming ack affected the send side
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AckOutcome {
    /// Nothing new, the ack was ignored
    Duplicate,
    /// Same cumulative position, but the peer advertised a different amount of free space
    WindowUpdate,
    /// The ack acknowledged `released` more messages
    Cumulative { released: usize },
    /// The ack referred to a sequence number that is not in flight
    Unknown,
}

/// Send buffer and send window of a single connection.
///
/// The buffer is a ring of slots. Messages are enqueued at `new_entry` and acknowledged from
///  `left_idx`, so occupied slots always form a contiguous run starting at `left_idx`. The
///  usable window starts at `left_idx` as well and is as wide as the peer's most recently
///  advertised free space, capped at the buffer's capacity.
///
/// `right_idx` is the circular index of the window's last slot. When the window is empty it is
///  the slot before `left_idx`, which is also its value when the window spans the entire buffer,
///  so decisions are based on the advertised width rather than on `right_idx`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendSide {
    payload_size: usize,
    ring: usize,
    initial_window: usize,

    buffer: Vec<Option<BufferedMessage>>,
    last_active_time: Vec<Option<Instant>>,

    left_idx: usize,
    right_idx: usize,
    new_entry: usize,
    last_seq_no: SeqNo,
    /// buffer index of the most recently transmitted message, `None` if nothing that is still
    ///  buffered was transmitted
    last_sent: Option<usize>,
    last_ack_seqno: SeqNo,
    last_ack_emptyspace: usize,
}

impl SendSide {
    pub fn new(capacity: usize, initial_window: usize, ring: usize, payload_size: usize) -> SendSide {
        let mut result = SendSide {
            payload_size,
            ring,
            initial_window,
            buffer: vec![None; capacity],
            last_active_time: vec![None; capacity],
            left_idx: 0,
            right_idx: 0,
            new_entry: 0,
            last_seq_no: 0,
            last_sent: None,
            last_ack_seqno: 0,
            last_ack_emptyspace: 0,
        };
        result.reset();
        result
    }

    pub fn reset(&mut self) {
        self.buffer.fill(None);
        self.last_active_time.fill(None);
        self.left_idx = 0;
        self.new_entry = 0;
        self.last_seq_no = 0;
        self.last_sent = None;
        self.last_ack_seqno = 0;
        self.last_ack_emptyspace = self.initial_window;
        self.right_idx = self.window_end(self.initial_window.min(self.capacity()));
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn idx_at(&self, offset: usize) -> usize {
        (self.left_idx + offset) % self.capacity()
    }

    fn offset_of(&self, idx: usize) -> usize {
        (idx + self.capacity() - self.left_idx) % self.capacity()
    }

    fn window_end(&self, width: usize) -> usize {
        (self.left_idx + width + self.capacity() - 1) % self.capacity()
    }

    /// The number of slots starting at `left_idx` that may be transmitted
    pub fn usable_width(&self) -> usize {
        self.last_ack_emptyspace.min(self.capacity())
    }

    pub fn num_buffered(&self) -> usize {
        self.buffer.iter().filter(|m| m.is_some()).count()
    }

    pub fn buffered_seq_nos(&self) -> Vec<SeqNo> {
        (0..self.capacity())
            .filter_map(|offset| self.buffer[self.idx_at(offset)].as_ref())
            .map(|m| m.seq_no)
            .collect()
    }

    pub fn last_ack(&self) -> AckInfo {
        AckInfo {
            seq_no: self.last_ack_seqno,
            empty_space: self.last_ack_emptyspace,
        }
    }

    /// Adds a message to the send buffer, assigning the next sequence number. This does not
    ///  transmit anything.
    pub fn enqueue(&mut self, payload: &[u8]) -> MtpResult<SeqNo> {
        if payload.len() > self.payload_size {
            return Err(MtpError::MessageTooLong { len: payload.len(), max: self.payload_size });
        }
        if self.buffer[self.new_entry].is_some() {
            return Err(MtpError::BufferFull);
        }

        let mut padded = BytesMut::zeroed(self.payload_size);
        padded[..payload.len()].copy_from_slice(payload);

        self.last_seq_no = next_seq(self.last_seq_no, self.ring);
        self.buffer[self.new_entry] = Some(BufferedMessage {
            seq_no: self.last_seq_no,
            payload: padded.freeze(),
        });
        self.last_active_time[self.new_entry] = None;
        trace!("enqueued message #{} at slot {}", self.last_seq_no, self.new_entry);

        self.new_entry = (self.new_entry + 1) % self.capacity();
        Ok(self.last_seq_no)
    }

    pub fn on_ack(&mut self, ack: AckInfo) -> AckOutcome {
        if ack.seq_no == self.last_ack_seqno {
            if ack.empty_space == self.last_ack_emptyspace {
                trace!("duplicate ack {:?}", ack);
                return AckOutcome::Duplicate;
            }

            debug!("window update: peer has space for {} messages (was {})", ack.empty_space, self.last_ack_emptyspace);
            self.last_ack_emptyspace = ack.empty_space;
            self.right_idx = self.window_end(ack.empty_space.min(self.capacity()));
            return AckOutcome::WindowUpdate;
        }

        if !is_ahead(ack.seq_no, self.last_ack_seqno, self.ring) {
            debug!("ack {:?} is behind the last ack #{} - ignoring", ack, self.last_ack_seqno);
            return AckOutcome::Duplicate;
        }

        let Some(acked_offset) = (0..self.capacity())
            .map_while(|offset| self.buffer[self.idx_at(offset)].as_ref())
            .position(|m| m.seq_no == ack.seq_no)
        else {
            warn!("ack {:?} refers to a message that is not in flight - ignoring", ack);
            return AckOutcome::Unknown;
        };

        if let Some(last_sent) = self.last_sent {
            if self.offset_of(last_sent) <= acked_offset {
                self.last_sent = None;
            }
        }
        for offset in 0..=acked_offset {
            let idx = self.idx_at(offset);
            self.buffer[idx] = None;
            self.last_active_time[idx] = None;
        }

        self.left_idx = self.idx_at(acked_offset + 1);
        self.last_ack_seqno = ack.seq_no;
        self.last_ack_emptyspace = ack.empty_space;
        self.right_idx = self.window_end(ack.empty_space.min(self.capacity()));

        debug!("ack #{} released {} messages, peer has space for {}", ack.seq_no, acked_offset + 1, ack.empty_space);
        AckOutcome::Cumulative { released: acked_offset + 1 }
    }

    /// Returns the data datagrams that are due for transmission and marks them as sent.
    ///
    /// If any transmitted message in the usable window has been waiting for its ack for longer
    ///  than `timeout`, the entire window is sent again (go-back-N). Otherwise, only messages that
    ///  were never transmitted are sent.
    pub fn collect_transmissions(&mut self, now: Instant, timeout: Duration) -> Vec<Datagram> {
        let width = self.usable_width();
        if width == 0 {
            return Vec::new();
        }

        let in_window = (0..width)
            .take_while(|&offset| self.buffer[self.idx_at(offset)].is_some())
            .count();

        let timed_out = (0..in_window)
            .filter_map(|offset| self.last_active_time[self.idx_at(offset)])
            .any(|sent_at| now.saturating_duration_since(sent_at) > timeout);

        let first_offset = if timed_out {
            debug!("retransmission timeout - resending {} messages starting at slot {}", in_window, self.left_idx);
            0
        }
        else {
            match self.last_sent {
                None => 0,
                Some(idx) => self.offset_of(idx) + 1,
            }
        };

        let mut result = Vec::new();
        for offset in first_offset..in_window {
            let idx = self.idx_at(offset);
            if let Some(message) = &self.buffer[idx] {
                result.push(Datagram::Data { seq_no: message.seq_no, payload: message.payload.clone() });
                self.last_active_time[idx] = Some(now);
                self.last_sent = Some(idx);
            }
        }
        result
    }
}

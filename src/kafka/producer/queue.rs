//! Bounded producer queue
//!
//! Shared between the application thread (which pushes messages and releases
//! them once their report is dispatched) and the delivery worker (which takes
//! batches). A single mutex guards the queue and its accounting; a condvar
//! wakes the worker when messages arrive, a flush starts, or the producer shuts
//! down.
//!
//! Accounting spans the whole life of a message: a message is
//! counted from `try_push` until `release`, i.e. while queued, while in
//! flight, and while its report waits to be dispatched by `Producer::poll`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::kafka::error::{EnqueueError, EnqueueFailure};
use crate::kafka::messages::{MessageId, OutboundMessage};

/// A message accepted into the queue
#[derive(Debug)]
pub(crate) struct QueuedMessage {
    pub id: MessageId,
    pub message: OutboundMessage,
    pub enqueued_at: Instant,
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<QueuedMessage>,
    /// Messages accepted and not yet released
    outstanding: usize,
    outstanding_bytes: usize,
    /// Number of active flush calls; while non-zero, linger is bypassed
    flushing: usize,
    /// Worker must stop; queued messages stay for the caller to purge
    shut_down: bool,
    next_id: u64,
}

pub(crate) struct ProducerQueue {
    state: Mutex<QueueState>,
    work_available: Condvar,
    max_messages: usize,
    max_bytes: usize,
}

impl ProducerQueue {
    pub fn new(max_messages: usize, max_bytes: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                outstanding: 0,
                outstanding_bytes: 0,
                flushing: 0,
                shut_down: false,
                next_id: 0,
            }),
            work_available: Condvar::new(),
            max_messages,
            max_bytes,
        }
    }

    /// Accept a message, or hand it back untouched
    ///
    /// Fails with `QueueFull` when either bound would be exceeded. A message
    /// larger than the byte bound is still accepted into an otherwise empty
    /// queue, so it cannot block forever.
    pub fn try_push(&self, message: OutboundMessage) -> Result<MessageId, EnqueueFailure> {
        let size = message.size();
        let mut state = self.state.lock();

        if state.shut_down {
            return Err(EnqueueFailure {
                error: EnqueueError::Closed,
                message,
            });
        }

        let over_count = state.outstanding + 1 > self.max_messages;
        let over_bytes =
            state.outstanding > 0 && state.outstanding_bytes.saturating_add(size) > self.max_bytes;
        if over_count || over_bytes {
            return Err(EnqueueFailure {
                error: EnqueueError::QueueFull,
                message,
            });
        }

        state.next_id += 1;
        let id = MessageId(state.next_id);
        state.outstanding += 1;
        state.outstanding_bytes += size;
        state.pending.push_back(QueuedMessage {
            id,
            message,
            enqueued_at: Instant::now(),
        });
        drop(state);

        self.work_available.notify_one();
        Ok(id)
    }

    /// Give back the accounting of a message whose report was dispatched
    pub fn release(&self, size: usize) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.outstanding_bytes = state.outstanding_bytes.saturating_sub(size);
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    pub fn begin_flush(&self) {
        self.state.lock().flushing += 1;
        self.work_available.notify_one();
    }

    pub fn end_flush(&self) {
        let mut state = self.state.lock();
        state.flushing = state.flushing.saturating_sub(1);
    }

    /// Stop the worker at its next wait point
    pub fn shutdown(&self) {
        self.state.lock().shut_down = true;
        self.work_available.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Remove every message the worker has not taken yet
    pub fn drain_pending(&self) -> Vec<QueuedMessage> {
        self.state.lock().pending.drain(..).collect()
    }

    /// Block until a batch is ready, then take up to `max` messages
    ///
    /// A batch is ready when `max` messages are queued, the oldest message has
    /// waited `linger`, or a flush is in progress. Returns `None` once the
    /// queue is shut down.
    pub fn next_batch(&self, linger: Duration, max: usize) -> Option<Vec<QueuedMessage>> {
        let mut state = self.state.lock();
        loop {
            if state.shut_down {
                return None;
            }

            match state.pending.front().map(|m| m.enqueued_at + linger) {
                None => self.work_available.wait(&mut state),
                Some(ready_at) => {
                    let ready = state.pending.len() >= max
                        || state.flushing > 0
                        || Instant::now() >= ready_at;
                    if ready {
                        let n = state.pending.len().min(max);
                        return Some(state.pending.drain(..n).collect());
                    }
                    self.work_available.wait_until(&mut state, ready_at);
                }
            }
        }
    }
}

//! Bounded outbound queue bridging application sends to suspended polls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// What a buffer listener receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Pending payloads, oldest first
    Messages(Vec<String>),
    /// The buffer was cleared while the listener was waiting
    Rejected,
}

impl Delivery {
    pub fn into_messages(self) -> Vec<String> {
        match self {
            Delivery::Messages(messages) => messages,
            Delivery::Rejected => Vec::new(),
        }
    }
}

/// One-shot consumer registered by a suspended poll
pub type BufferListener = oneshot::Sender<Delivery>;

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<String>,
    size: usize,
    listener: Option<BufferListener>,
}

/// Bounded FIFO of encoded outbound payloads, sized in bytes.
///
/// Producers wait (up to a deadline) for space; a registered listener takes
/// messages directly without them ever being queued.
#[derive(Debug)]
pub struct TransportBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    space_available: Notify,
}

impl TransportBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState::default()),
            space_available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered
    pub fn size(&self) -> usize {
        self.lock().size
    }

    /// Bytes that can be enqueued without waiting
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.lock().size)
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn has_listener(&self) -> bool {
        self.lock().listener.is_some()
    }

    /// Queue `message`, or hand it to the registered listener.
    ///
    /// Waits up to `max_wait` for space when the buffer is full. Returns
    /// `false` if the message could not be accepted in time; callers treat
    /// that as fatal for the connection.
    pub async fn put_message(&self, message: String, max_wait: Duration) -> bool {
        let size = message.len();
        if size > self.capacity {
            warn!(
                size,
                capacity = self.capacity,
                "Message can never fit in transport buffer"
            );
            return false;
        }

        let deadline = Instant::now() + max_wait;
        let mut message = message;

        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);

            {
                let mut state = self.lock();

                if state.queue.is_empty() {
                    if let Some(listener) = state.listener.take() {
                        match listener.send(Delivery::Messages(vec![message])) {
                            Ok(()) => {
                                trace!(size, "Delivered message straight to listener");
                                return true;
                            }
                            Err(undelivered) => {
                                debug!("Buffer listener went away, queueing instead");
                                message = undelivered
                                    .into_messages()
                                    .into_iter()
                                    .next()
                                    .unwrap_or_default();
                            }
                        }
                    }
                }

                if self.capacity.saturating_sub(state.size) >= size {
                    state.size += size;
                    state.queue.push_back(message);
                    trace!(size, buffered = state.size, "Queued message");
                    return true;
                }

                // Register for wakeups before releasing the lock so a drain
                // between here and the await is not missed.
                notified.as_mut().enable();
            }

            if max_wait.is_zero() || Instant::now() >= deadline {
                debug!(size, "Transport buffer full, giving up");
                return false;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(size, wait = ?max_wait, "Timed out waiting for buffer space");
                return false;
            }
        }
    }

    /// Remove and return everything buffered, waking blocked producers
    pub fn drain_messages(&self) -> Vec<String> {
        let drained: Vec<String> = {
            let mut state = self.lock();
            state.size = 0;
            state.queue.drain(..).collect()
        };
        if !drained.is_empty() {
            self.space_available.notify_waiters();
        }
        drained
    }

    /// Register a one-shot consumer.
    ///
    /// If messages are already waiting they are delivered right away and the
    /// listener is not kept; returns `true` in that case.
    pub fn set_listener(&self, listener: BufferListener) -> bool {
        let mut state = self.lock();
        if state.queue.is_empty() {
            if let Some(previous) = state.listener.replace(listener) {
                let _ = previous.send(Delivery::Rejected);
            }
            return false;
        }

        let pending: Vec<String> = state.queue.drain(..).collect();
        state.size = 0;
        drop(state);
        self.space_available.notify_waiters();

        match listener.send(Delivery::Messages(pending)) {
            Ok(()) => true,
            Err(undelivered) => {
                self.restore(undelivered.into_messages());
                false
            }
        }
    }

    /// Unregister the current listener without delivering anything
    pub fn take_listener(&self) -> Option<BufferListener> {
        self.lock().listener.take()
    }

    /// Put undelivered messages back at the head of the queue
    fn restore(&self, messages: Vec<String>) {
        let mut state = self.lock();
        for message in messages.into_iter().rev() {
            state.size += message.len();
            state.queue.push_front(message);
        }
    }

    /// Discard all buffered content. A waiting listener is told `Rejected`.
    pub fn clear(&self) {
        let listener = {
            let mut state = self.lock();
            state.queue.clear();
            state.size = 0;
            state.listener.take()
        };
        self.space_available.notify_waiters();
        if let Some(listener) = listener {
            let _ = listener.send(Delivery::Rejected);
        }
    }
}

//! The message bus.
//!
//! Every pipeline owns a [`Bus`]: a FIFO of [`Message`]s posted by its
//! elements from any thread and drained by the application, blocking with a
//! timeout or asynchronously.
//!
//! Filtered reads ([`Bus::timed_pop_filtered`]) remove and drop the
//! non-matching messages they pass over; callers that need every message
//! should read unfiltered and dispatch on [`Message::message_type`].

mod message;

pub use message::{Message, MessageText, MessageTypes, MessageView, StateChanged};

use crate::clock::ClockTime;
use crate::observability;
use futures::Stream;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::trace;

struct BusState {
    queue: VecDeque<Message>,
    flushing: bool,
}

struct BusInner {
    name: String,
    state: Mutex<BusState>,
    cond: Condvar,
    notify: Notify,
}

/// Ordered message queue shared by a pipeline and the application.
#[derive(Clone)]
pub struct Bus(Arc<BusInner>);

impl Bus {
    /// Create an empty bus.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(BusInner {
            name: name.into(),
            state: Mutex::new(BusState {
                queue: VecDeque::new(),
                flushing: false,
            }),
            cond: Condvar::new(),
            notify: Notify::new(),
        }))
    }

    /// Name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Append a message. Returns `false` if the bus is flushing and the
    /// message was dropped.
    pub fn post(&self, message: Message) -> bool {
        let depth = {
            let mut state = self.0.state.lock();
            if state.flushing {
                trace!(bus = %self.0.name, kind = message.type_name(), "bus flushing, message dropped");
                return false;
            }
            trace!(bus = %self.0.name, kind = message.type_name(), src = ?message.src_name(), "message posted");
            observability::record_message_posted(message.type_name());
            state.queue.push_back(message);
            state.queue.len()
        };
        observability::record_bus_depth(&self.0.name, depth);
        self.0.cond.notify_all();
        self.0.notify.notify_waiters();
        true
    }

    /// Take the oldest message without waiting.
    pub fn pop(&self) -> Option<Message> {
        self.timed_pop_filtered(ClockTime::ZERO, MessageTypes::ANY)
    }

    /// Take the oldest message, waiting up to `timeout`
    /// ([`ClockTime::NONE`]: forever).
    pub fn timed_pop(&self, timeout: ClockTime) -> Option<Message> {
        self.timed_pop_filtered(timeout, MessageTypes::ANY)
    }

    /// Take the oldest message of the kinds in `types` without waiting.
    /// Non-matching messages ahead of it are dropped.
    pub fn pop_filtered(&self, types: MessageTypes) -> Option<Message> {
        self.timed_pop_filtered(ClockTime::ZERO, types)
    }

    /// Take the first message of the kinds in `types`, waiting up to
    /// `timeout`. Non-matching messages encountered meanwhile are dropped.
    pub fn timed_pop_filtered(&self, timeout: ClockTime, types: MessageTypes) -> Option<Message> {
        let deadline = timeout.as_timeout().map(|t| Instant::now() + t);
        let mut state = self.0.state.lock();
        loop {
            while let Some(message) = state.queue.pop_front() {
                if types.intersects(message.message_type()) {
                    let depth = state.queue.len();
                    drop(state);
                    observability::record_bus_depth(&self.0.name, depth);
                    return Some(message);
                }
                trace!(bus = %self.0.name, kind = message.type_name(), "filtered message dropped");
            }
            match deadline {
                None => self.0.cond.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    if self.0.cond.wait_until(&mut state, deadline).timed_out()
                        && state.queue.is_empty()
                    {
                        return None;
                    }
                }
            }
        }
    }

    /// Kind of the oldest message, leaving it queued.
    pub fn peek(&self) -> Option<MessageTypes> {
        self.0.state.lock().queue.front().map(Message::message_type)
    }

    /// Whether messages are waiting.
    pub fn have_pending(&self) -> bool {
        !self.0.state.lock().queue.is_empty()
    }

    /// Number of waiting messages.
    pub fn len(&self) -> usize {
        self.0.state.lock().queue.len()
    }

    /// Whether no message is waiting.
    pub fn is_empty(&self) -> bool {
        !self.have_pending()
    }

    /// While flushing, queued messages are dropped and posts are refused.
    pub fn set_flushing(&self, flushing: bool) {
        {
            let mut state = self.0.state.lock();
            state.flushing = flushing;
            if flushing {
                state.queue.clear();
            }
        }
        trace!(bus = %self.0.name, flushing, "bus flushing changed");
        if flushing {
            observability::record_bus_depth(&self.0.name, 0);
        }
        self.0.cond.notify_all();
        self.0.notify.notify_waiters();
    }

    /// Whether the bus is flushing.
    pub fn is_flushing(&self) -> bool {
        self.0.state.lock().flushing
    }

    /// Wait for the next message without blocking a thread.
    ///
    /// Resolves to `None` while the bus is flushing.
    pub async fn pop_async(&self) -> Option<Message> {
        loop {
            let mut notified = std::pin::pin!(self.0.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.0.state.lock();
                if state.flushing {
                    return None;
                }
                if let Some(message) = state.queue.pop_front() {
                    return Some(message);
                }
            }
            notified.await;
        }
    }

    /// All future messages as a stream; ends when the bus starts flushing.
    ///
    /// The stream is not `Unpin`; pin it before polling with `next()`.
    pub fn stream(&self) -> impl Stream<Item = Message> + Send + 'static {
        futures::stream::unfold(self.clone(), |bus| async move {
            let message = bus.pop_async().await?;
            Some((message, bus))
        })
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.0.name)
            .field("pending", &self.len())
            .finish()
    }
}

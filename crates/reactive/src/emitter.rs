//! Serialized delivery to one listener.
//!
//! Operators compute their output under their own state lock but must call
//! downstream without holding it, since a downstream handler may feed the
//! same operator again (an edit from inside a handler, a parameter change).
//! The emitter splits delivery in two steps: `push` queues a notification
//! and is called under the state lock, so queue order always matches state
//! order; `drain` delivers queued notifications with no lock held. Only one
//! caller drains at a time. A push that arrives while another caller is
//! draining, including a re-entrant push from the listener itself, is
//! delivered by that drainer after the current notification returns.
//!
//! After a terminal notification the emitter ignores everything.

use crate::observable::{Listener, Notification};
use parking_lot::Mutex;
use std::collections::VecDeque;

struct State<T> {
    pending: VecDeque<Notification<T>>,
    draining: bool,
    terminated: bool,
}

/// Serializes notifications to one listener.
pub struct Emitter<T> {
    listener: Listener<T>,
    state: Mutex<State<T>>,
}

impl<T> Emitter<T> {
    /// Creates an emitter delivering to `listener`.
    pub fn new(listener: Listener<T>) -> Self {
        Self {
            listener,
            state: Mutex::new(State {
                pending: VecDeque::new(),
                draining: false,
                terminated: false,
            }),
        }
    }

    /// Returns true once a terminal notification was pushed.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Queues a notification. Returns true if the caller must `drain`.
    #[must_use = "a queued notification is only delivered by drain"]
    pub fn push(&self, notification: Notification<T>) -> bool {
        let mut state = self.state.lock();
        if state.terminated {
            return false;
        }
        state.terminated = notification.is_terminal();
        state.pending.push_back(notification);
        !core::mem::replace(&mut state.draining, true)
    }

    /// Delivers queued notifications until the queue is empty.
    pub fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(notification) => notification,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            (self.listener)(&next);
        }
    }

    /// Queues and delivers a notification.
    pub fn emit(&self, notification: Notification<T>) {
        if self.push(notification) {
            self.drain();
        }
    }

    /// Delivers a value.
    #[inline]
    pub fn next(&self, value: T) {
        self.emit(Notification::Next(value));
    }
}

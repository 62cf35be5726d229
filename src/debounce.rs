//! Trailing-edge debouncing of field edits.
//!
//! A [`Debouncer`] is an explicit, cancellable timer holding at most one
//! scheduled invocation. Every [`schedule`](Debouncer::schedule) replaces
//! the pending arguments and pushes the deadline to `now + delay`; the
//! superseded arguments are dropped, never queued. Nothing fires until the
//! owner calls [`fire`](Debouncer::fire) with a time at or past the
//! deadline, so the timer works the same under a real clock or a test's
//! hand-advanced [`Instant`].
//!
//! ```text
//! trigger(a) ─ trigger(b) ─ trigger(c) ──── delay ────▶ fire → c
//! ```
//!
//! [`Debounced`] pairs the timer with a callback for callers that want the
//! plain "wrap a function, get a trigger" shape.

use std::time::{Duration, Instant};

#[derive(Debug)]
struct Scheduled<A> {
    deadline: Instant,
    args: A,
}

/// Single-slot trailing debounce timer.
#[derive(Debug)]
pub struct Debouncer<A> {
    delay: Duration,
    pending: Option<Scheduled<A>>,
}

impl<A> Debouncer<A> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `args` to fire `delay` after `now`, cancelling anything
    /// pending. Returns the superseded arguments, if any.
    pub fn schedule(&mut self, args: A, now: Instant) -> Option<A> {
        let previous = self.pending.replace(Scheduled {
            deadline: now + self.delay,
            args,
        });
        previous.map(|s| s.args)
    }

    /// Drop the pending invocation without firing it.
    pub fn cancel(&mut self) -> Option<A> {
        self.pending.take().map(|s| s.args)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending invocation becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|s| s.deadline)
    }

    /// Take the pending arguments if their deadline has been reached.
    pub fn fire(&mut self, now: Instant) -> Option<A> {
        let due = self.pending.as_ref().is_some_and(|s| now >= s.deadline);
        if due {
            self.pending.take().map(|s| s.args)
        } else {
            None
        }
    }
}

/// A callback wrapped in a [`Debouncer`].
pub struct Debounced<A, F>
where
    F: FnMut(A),
{
    timer: Debouncer<A>,
    callback: F,
}

impl<A, F> Debounced<A, F>
where
    F: FnMut(A),
{
    pub fn new(delay: Duration, callback: F) -> Self {
        Self {
            timer: Debouncer::new(delay),
            callback,
        }
    }

    /// Record a call; only the last call of a burst reaches the callback.
    pub fn trigger(&mut self, args: A, now: Instant) {
        self.timer.schedule(args, now);
    }

    /// Run the callback if the pending call is due. Returns whether it ran.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.timer.fire(now) {
            Some(args) => {
                (self.callback)(args);
                true
            }
            None => false,
        }
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }
}

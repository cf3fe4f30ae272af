//! Single-threaded discrete-event scheduler.
//!
//! All protocol state transitions in this crate run as callbacks dispatched
//! from this scheduler, in strictly increasing virtual time. Events that
//! share a timestamp execute in the order they were scheduled, enforced by
//! a per-event sequence number.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use log::trace;

use crate::time::{Duration, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    Pending,
    Fired,
    Canceled,
}

/// Handle to a scheduled event.
///
/// Mirrors the check-before-cancel timer idiom: callers test
/// [`is_pending`](TimerHandle::is_pending) before deciding whether a slot
/// still holds a live timer. Canceling an event that already fired is a
/// no-op; a canceled event never runs its callback.
pub struct TimerHandle {
    state: Rc<Cell<EventState>>,
}

impl TimerHandle {
    /// True while the event is queued and neither fired nor canceled.
    pub fn is_pending(&self) -> bool {
        self.state.get() == EventState::Pending
    }

    /// Cancel the event if it has not fired yet.
    pub fn cancel(&self) {
        if self.state.get() == EventState::Pending {
            self.state.set(EventState::Canceled);
        }
    }
}

struct ScheduledEvent {
    at: Timestamp,
    seq: u64,
    state: Rc<Cell<EventState>>,
    action: Box<dyn FnOnce()>,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behaviour (BinaryHeap is a max-heap).
        // Time first, then insertion order for same-time events.
        match other.at.cmp(&self.at) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

struct Queue {
    now: Timestamp,
    next_seq: u64,
    heap: BinaryHeap<ScheduledEvent>,
}

/// Shared handle to the event queue.
///
/// Cloning is cheap; all clones drive the same virtual clock. The model is
/// cooperative and single-threaded: a callback never interrupts another,
/// and scheduling from within a callback is allowed.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<RefCell<Queue>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Queue {
                now: Timestamp::ZERO,
                next_seq: 0,
                heap: BinaryHeap::new(),
            })),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Timestamp {
        self.inner.borrow().now
    }

    /// Schedule `action` to run `delay` after the current virtual time.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        let state = Rc::new(Cell::new(EventState::Pending));
        let mut q = self.inner.borrow_mut();
        let at = q.now + delay;
        let seq = q.next_seq;
        q.next_seq += 1;
        trace!("schedule event #{} at {}", seq, at);
        q.heap.push(ScheduledEvent {
            at,
            seq,
            state: state.clone(),
            action: Box::new(action),
        });
        TimerHandle { state }
    }

    /// Run events until the queue is exhausted.
    pub fn run(&self) {
        while let Some(ev) = self.pop_due(None) {
            (ev.action)();
        }
    }

    /// Run events scheduled at or before `end`, then advance the clock to
    /// `end` even if the queue still holds later events.
    pub fn run_until(&self, end: Timestamp) {
        while let Some(ev) = self.pop_due(Some(end)) {
            (ev.action)();
        }
        let mut q = self.inner.borrow_mut();
        if end > q.now {
            q.now = end;
        }
    }

    /// Pop the next runnable event, discarding canceled ones, and advance
    /// the clock to its timestamp. The queue borrow is released before the
    /// caller invokes the action, so actions are free to schedule.
    fn pop_due(&self, limit: Option<Timestamp>) -> Option<ScheduledEvent> {
        let mut q = self.inner.borrow_mut();
        loop {
            match q.heap.peek() {
                Some(ev) if limit.map_or(true, |end| ev.at <= end) => {}
                _ => return None,
            }
            let ev = q.heap.pop().unwrap();
            if ev.state.get() == EventState::Canceled {
                continue;
            }
            debug_assert!(ev.at >= q.now, "event queue went backwards in time");
            q.now = ev.at;
            ev.state.set(EventState::Fired);
            return Some(ev);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

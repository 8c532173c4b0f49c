// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use calloop::{
    ping::Ping,
    timer::{TimeoutAction, Timer},
    LoopHandle, RegistrationToken,
};
use tracing::warn;

use crate::backend::OutputId;
use crate::wayland::protocols::screen_mirror::MirrorSessionId;

/// A drainable queue bridging asynchronous completions (hardware callbacks,
/// protocol events) back onto the event loop. Senders may be handed to the
/// device implementation; the loop drains between dispatches.
pub struct EventQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
    ping: Arc<Mutex<Option<Ping>>>,
}

#[derive(Debug)]
pub struct EventSender<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
    ping: Arc<Mutex<Option<Ping>>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        EventSender {
            inner: self.inner.clone(),
            ping: self.ping.clone(),
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        EventQueue::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> EventQueue<T> {
        EventQueue {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            ping: Arc::new(Mutex::new(None)),
        }
    }

    /// Wake the given ping whenever an event is queued.
    pub fn set_ping(&self, ping: Ping) {
        *self.ping.lock().unwrap() = Some(ping);
    }

    pub fn sender(&self) -> EventSender<T> {
        EventSender {
            inner: self.inner.clone(),
            ping: self.ping.clone(),
        }
    }

    pub fn drain(&self) -> Vec<T> {
        self.inner.lock().unwrap().drain(..).collect()
    }
}

impl<T> EventSender<T> {
    pub fn send(&self, event: T) {
        self.inner.lock().unwrap().push_back(event);
        if let Some(ping) = self.ping.lock().unwrap().as_ref() {
            ping.ping();
        }
    }
}

/// Deferred work owned by one of the managers. Every variant names its owner
/// so a teardown can cancel outstanding timers without a callback firing into
/// a freed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledEvent {
    /// The wait-presentation grace period of an external output elapsed.
    EomPresentationDelay(OutputId),
    /// Software vblank substitute tick for a paced mirror session.
    CapturePace(MirrorSessionId),
    /// A privileged capture block ran out.
    CaptureUnblock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

pub trait Scheduler {
    fn schedule(&self, after: Duration, event: ScheduledEvent) -> TimerToken;
    fn cancel(&self, token: TimerToken);
}

/// Production scheduler backed by calloop timers on the main event loop.
pub struct LoopScheduler {
    handle: LoopHandle<'static, crate::state::State>,
    tokens: Arc<Mutex<HashMap<TimerToken, RegistrationToken>>>,
    counter: AtomicU64,
}

impl LoopScheduler {
    pub fn new(handle: LoopHandle<'static, crate::state::State>) -> LoopScheduler {
        LoopScheduler {
            handle,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(1),
        }
    }
}

impl Scheduler for LoopScheduler {
    fn schedule(&self, after: Duration, event: ScheduledEvent) -> TimerToken {
        let token = TimerToken(self.counter.fetch_add(1, Ordering::Relaxed));
        let tokens = self.tokens.clone();
        match self
            .handle
            .insert_source(Timer::from_duration(after), move |_, _, state| {
                tokens.lock().unwrap().remove(&token);
                state.on_scheduled(event);
                TimeoutAction::Drop
            }) {
            Ok(registration) => {
                self.tokens.lock().unwrap().insert(token, registration);
            }
            Err(err) => {
                warn!(?err, ?event, "Failed to schedule timer");
            }
        }
        token
    }

    fn cancel(&self, token: TimerToken) {
        if let Some(registration) = self.tokens.lock().unwrap().remove(&token) {
            self.handle.remove(registration);
        }
    }
}

/// Recording scheduler for tests. Fire paths are driven by calling the
/// manager's scheduled-event entry point directly.
#[cfg(test)]
pub struct TestScheduler {
    counter: AtomicU64,
    pending: Mutex<Vec<(TimerToken, Duration, ScheduledEvent)>>,
}

#[cfg(test)]
impl TestScheduler {
    pub fn new() -> Arc<TestScheduler> {
        Arc::new(TestScheduler {
            counter: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn pending(&self) -> Vec<(TimerToken, Duration, ScheduledEvent)> {
        self.pending.lock().unwrap().clone()
    }

    /// Remove and return the next pending timer, oldest first.
    pub fn pop(&self) -> Option<(Duration, ScheduledEvent)> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            None
        } else {
            let (_, after, event) = pending.remove(0);
            Some((after, event))
        }
    }
}

#[cfg(test)]
impl Scheduler for TestScheduler {
    fn schedule(&self, after: Duration, event: ScheduledEvent) -> TimerToken {
        let token = TimerToken(self.counter.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().unwrap().push((token, after, event));
        token
    }

    fn cancel(&self, token: TimerToken) {
        self.pending.lock().unwrap().retain(|(t, ..)| *t != token);
    }
}

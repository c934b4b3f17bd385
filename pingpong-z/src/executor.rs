//! Single-threaded cooperative executor.
//!
//! The executor owns a bounded set of event sources (timers and
//! subscriptions). Each [`Executor::spin_once`] runs one scheduling tick:
//!
//! 1. **Polling**: every source is asked whether it has a pending event. A
//!    subscription moves at most one message out of its queue into a pending
//!    slot. If nothing is ready the executor sleeps on its guard condition until
//!    data arrives, a timer comes due, or the tick timeout runs out.
//! 2. **Dispatching**: every source with a pending event gets exactly one
//!    callback, in registration order.
//!
//! Callbacks receive `&mut C`, the application context owned by the caller.
//! They run on the spinning thread only, one at a time.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::{CallbackError, CapacityExceeded, ExecutorError};
use crate::guard_condition::GuardCondition;
use crate::msg::ZMessage;
use crate::pubsub::ZSub;
use crate::timer::{Timer, TimerInfo};

/// Timer plus subscription plus one spare slot.
pub const DEFAULT_CAPACITY: usize = 3;
pub const DEFAULT_SPIN_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ExecutorState {
    Idle,
    Polling,
    Dispatching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HandleKind {
    Timer,
    Subscription,
}

pub type TimerCallback<C> = Box<dyn FnMut(&mut C, TimerInfo) -> Result<(), CallbackError>>;
pub type SubscriptionCallback<C, T> = Box<dyn FnMut(&mut C, T) -> Result<(), CallbackError>>;

/// An event source the executor can poll and dispatch.
trait Handle<C> {
    fn name(&self) -> &str;
    fn kind(&self) -> HandleKind;
    /// Record whether an event is pending; returns that flag.
    fn poll(&mut self, now: Instant) -> bool;
    /// Upper bound on how long the source stays not-ready, if known.
    fn time_until_ready(&self, now: Instant) -> Option<Duration>;
    /// Run the callback for the pending event, if any. Returns whether a
    /// callback ran.
    fn dispatch(&mut self, ctx: &mut C, now: Instant) -> Result<bool, CallbackError>;
}

struct TimerHandle<C> {
    name: String,
    timer: Timer,
    due: bool,
    callback: TimerCallback<C>,
}

impl<C> Handle<C> for TimerHandle<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Timer
    }

    fn poll(&mut self, now: Instant) -> bool {
        self.due = self.timer.is_ready(now);
        self.due
    }

    fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        Some(self.timer.time_until_next_call(now))
    }

    fn dispatch(&mut self, ctx: &mut C, now: Instant) -> Result<bool, CallbackError> {
        if !std::mem::take(&mut self.due) {
            return Ok(false);
        }
        let info = self.timer.call(now);
        trace!("[EXEC] Timer '{}' fired, since_last_call={:?}", self.name, info.since_last_call);
        (self.callback)(ctx, info).map(|_| true)
    }
}

struct SubscriptionHandle<C, T: ZMessage> {
    name: String,
    sub: ZSub<T>,
    pending: Option<Result<T, crate::error::TransportError>>,
    callback: SubscriptionCallback<C, T>,
}

impl<C, T: ZMessage> Handle<C> for SubscriptionHandle<C, T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Subscription
    }

    fn poll(&mut self, _now: Instant) -> bool {
        if self.pending.is_none() {
            self.pending = self.sub.try_recv();
        }
        self.pending.is_some()
    }

    fn time_until_ready(&self, _now: Instant) -> Option<Duration> {
        None
    }

    fn dispatch(&mut self, ctx: &mut C, _now: Instant) -> Result<bool, CallbackError> {
        match self.pending.take() {
            None => Ok(false),
            Some(Ok(msg)) => (self.callback)(ctx, msg).map(|_| true),
            // Undecodable payloads count as a dispatched, failed event.
            Some(Err(e)) => Err(e.into()),
        }
    }
}

pub struct Executor<C> {
    handles: Vec<Box<dyn Handle<C>>>,
    capacity: usize,
    state: ExecutorState,
    guard_condition: Arc<GuardCondition>,
}

impl<C> Executor<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            handles: Vec::with_capacity(capacity),
            capacity,
            state: ExecutorState::Idle,
            guard_condition: Arc::new(GuardCondition::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Registered sources as `(name, kind)`, in dispatch order.
    pub fn registrations(&self) -> Vec<(String, HandleKind)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.kind()))
            .collect()
    }

    /// Hand this to subscriptions so arrivals wake a waiting tick.
    pub fn guard_condition(&self) -> Arc<GuardCondition> {
        self.guard_condition.clone()
    }

    fn register(&mut self, handle: Box<dyn Handle<C>>) -> Result<(), CapacityExceeded> {
        if self.handles.len() >= self.capacity {
            return Err(CapacityExceeded {
                capacity: self.capacity,
            });
        }
        debug!("[EXEC] Registered {} '{}'", handle.kind(), handle.name());
        self.handles.push(handle);
        Ok(())
    }

    pub fn add_timer<F>(&mut self, name: &str, timer: Timer, callback: F) -> Result<(), CapacityExceeded>
    where
        C: 'static,
        F: FnMut(&mut C, TimerInfo) -> Result<(), CallbackError> + 'static,
    {
        self.register(Box::new(TimerHandle {
            name: name.to_string(),
            timer,
            due: false,
            callback: Box::new(callback),
        }))
    }

    pub fn add_subscription<T, F>(
        &mut self,
        name: &str,
        sub: ZSub<T>,
        callback: F,
    ) -> Result<(), CapacityExceeded>
    where
        C: 'static,
        T: ZMessage + 'static,
        F: FnMut(&mut C, T) -> Result<(), CallbackError> + 'static,
    {
        self.register(Box::new(SubscriptionHandle {
            name: name.to_string(),
            sub,
            pending: None,
            callback: Box::new(callback),
        }))
    }

    /// Poll every source; returns whether any is ready.
    fn poll_all(&mut self, now: Instant) -> bool {
        self.handles
            .iter_mut()
            .fold(false, |ready, h| h.poll(now) | ready)
    }

    /// Run one scheduling tick, waiting up to `timeout` for something to
    /// become ready. Returns the number of callbacks that ran; zero is a
    /// normal outcome.
    pub fn spin_once(&mut self, ctx: &mut C, timeout: Duration) -> Result<usize, ExecutorError> {
        self.state = ExecutorState::Polling;
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if self.poll_all(now) || now >= deadline {
                break;
            }
            let wait = self
                .handles
                .iter()
                .filter_map(|h| h.time_until_ready(now))
                .fold(deadline - now, Duration::min);
            trace!("[EXEC] Nothing ready, waiting {:?}", wait);
            self.guard_condition.wait_for(wait);
        }

        self.state = ExecutorState::Dispatching;
        let now = Instant::now();
        let mut dispatched = 0;
        for handle in self.handles.iter_mut() {
            match handle.dispatch(ctx, now) {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(CallbackError::Recoverable(reason)) => {
                    dispatched += 1;
                    warn!("[EXEC] {} '{}' failed, skipping: {}", handle.kind(), handle.name(), reason);
                }
                Err(CallbackError::Fatal(reason)) => {
                    self.state = ExecutorState::Idle;
                    error!("[EXEC] {} '{}' failed fatally: {}", handle.kind(), handle.name(), reason);
                    return Err(ExecutorError::CallbackFailure {
                        source_name: handle.name().to_string(),
                        reason,
                    });
                }
            }
        }

        self.state = ExecutorState::Idle;
        Ok(dispatched)
    }

    /// Spin until `token` is cancelled, yielding `idle_interval` between
    /// ticks. The token is checked at the top of every tick; a callback in
    /// flight always completes.
    pub fn spin(
        &mut self,
        ctx: &mut C,
        token: &CancellationToken,
        spin_timeout: Duration,
        idle_interval: Duration,
    ) -> Result<(), ExecutorError> {
        debug!("[EXEC] Spinning {} sources", self.handles.len());
        while !token.is_cancelled() {
            self.spin_once(ctx, spin_timeout)?;
            if !idle_interval.is_zero() {
                thread::sleep(idle_interval);
            }
        }
        debug!("[EXEC] Cancelled, leaving spin");
        Ok(())
    }
}

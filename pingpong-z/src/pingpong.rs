//! The ping/pong application: a periodic ping publisher, a pong subscriber
//! that drops its own echoes, and the executor wiring between them.

use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Builder;
use crate::buffer::{self, FrameBuffer};
use crate::error::{CallbackError, ExecutorError, PublishError, SetupError};
use crate::executor::{self, Executor};
use crate::msg::Message;
use crate::node::ZNode;
use crate::pubsub::ZPub;
use crate::qos::QosProfile;
use crate::timer::Timer;

pub const DEFAULT_PUB_CHANNEL: &str = "/microROS/pub";
pub const DEFAULT_SUB_CHANNEL: &str = "/microROS/sub";
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(2000);

/// Monotonic ping sequence. Wraps to zero after `i32::MAX` so ids stay in
/// the non-negative `int` range peers expect.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    pub fn starting_at(next: u32) -> Self {
        Self {
            next: next.min(i32::MAX as u32),
        }
    }

    pub fn advance(&mut self) -> u32 {
        let current = self.next;
        self.next = if current >= i32::MAX as u32 {
            0
        } else {
            current + 1
        };
        current
    }
}

/// Remembers the last label this node published.
#[derive(Debug, Default)]
pub struct SelfEchoFilter {
    last_published: String,
    armed: bool,
}

impl SelfEchoFilter {
    pub fn record(&mut self, label: &str) {
        self.last_published.clear();
        self.last_published.push_str(label);
        self.armed = true;
    }

    pub fn last_published(&self) -> Option<&str> {
        self.armed.then_some(self.last_published.as_str())
    }

    pub fn is_echo(&self, msg: &Message) -> bool {
        self.armed && msg.frame_label == self.last_published
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Echo,
    Forwarded,
}

/// Receives every inbound ping that is not our own echo.
pub trait PongHandler {
    fn on_pong(&mut self, msg: &Message) -> Result<(), CallbackError>;
}

impl<F> PongHandler for F
where
    F: FnMut(&Message) -> Result<(), CallbackError>,
{
    fn on_pong(&mut self, msg: &Message) -> Result<(), CallbackError> {
        self(msg)
    }
}

/// Logs and otherwise ignores foreign pings.
#[derive(Debug, Default)]
pub struct LogPongHandler;

impl PongHandler for LogPongHandler {
    fn on_pong(&mut self, msg: &Message) -> Result<(), CallbackError> {
        debug!(
            "[PONG] Ping {} from {} stamped {}.{:09}",
            msg.sequence_id, msg.originator_id, msg.timestamp.sec, msg.timestamp.nanosec
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PingPongStats {
    /// Timer firings, successful or not.
    pub ticks: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub echoes: u64,
    pub forwarded: u64,
}

/// State shared by the timer and subscription callbacks.
pub struct PingPong {
    originator_id: u32,
    buffer: FrameBuffer,
    publisher: ZPub<Message>,
    sequence: SequenceCounter,
    filter: SelfEchoFilter,
    handler: Box<dyn PongHandler>,
    stats: PingPongStats,
}

impl PingPong {
    pub fn originator_id(&self) -> u32 {
        self.originator_id
    }

    pub fn publisher(&self) -> &ZPub<Message> {
        &self.publisher
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn filter(&self) -> &SelfEchoFilter {
        &self.filter
    }

    pub fn stats(&self) -> PingPongStats {
        self.stats
    }

    /// Build the next ping and send it.
    ///
    /// The sequence id is consumed even when the send fails; the echo filter
    /// only learns the label after the transport accepted it.
    pub fn publish_tick(&mut self, now: SystemTime) -> Result<(), PublishError> {
        self.stats.ticks += 1;
        let result = self.try_publish(now);
        match &result {
            Ok(()) => self.stats.published += 1,
            Err(_) => self.stats.publish_failures += 1,
        }
        result
    }

    fn try_publish(&mut self, now: SystemTime) -> Result<(), PublishError> {
        let sequence_id = self.sequence.advance();
        let msg = self
            .buffer
            .reset_and_fill(sequence_id, self.originator_id, now)?;
        self.publisher.publish(msg)?;
        self.filter.record(&msg.frame_label);
        debug!("[PING] Sent {}", msg.frame_label);
        Ok(())
    }

    /// Drop our own echo, forward anything else.
    pub fn on_message(&mut self, msg: &Message) -> Result<FilterOutcome, CallbackError> {
        if self.filter.is_echo(msg) {
            self.stats.echoes += 1;
            debug!("[PONG] Ignoring own echo {}", msg.frame_label);
            return Ok(FilterOutcome::Echo);
        }
        self.stats.forwarded += 1;
        self.handler.on_pong(msg)?;
        Ok(FilterOutcome::Forwarded)
    }
}

pub struct PingPongBuilder<'a> {
    node: &'a ZNode,
    pub_channel: String,
    sub_channel: String,
    pub_qos: QosProfile,
    sub_qos: QosProfile,
    period: Duration,
    buffer_capacity: usize,
    executor_capacity: usize,
    originator_id: Option<u32>,
    handler: Box<dyn PongHandler>,
    tick_limit: Option<(u64, CancellationToken)>,
}

impl<'a> PingPongBuilder<'a> {
    pub fn new(node: &'a ZNode) -> Self {
        Self {
            node,
            pub_channel: DEFAULT_PUB_CHANNEL.to_string(),
            sub_channel: DEFAULT_SUB_CHANNEL.to_string(),
            pub_qos: QosProfile::reliable(),
            sub_qos: QosProfile::best_effort(),
            period: DEFAULT_PERIOD,
            buffer_capacity: buffer::DEFAULT_CAPACITY,
            executor_capacity: executor::DEFAULT_CAPACITY,
            originator_id: None,
            handler: Box::new(LogPongHandler),
            tick_limit: None,
        }
    }

    pub fn with_pub_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.pub_channel = channel.into();
        self
    }

    pub fn with_sub_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.sub_channel = channel.into();
        self
    }

    pub fn with_pub_qos(mut self, qos: QosProfile) -> Self {
        self.pub_qos = qos;
        self
    }

    pub fn with_sub_qos(mut self, qos: QosProfile) -> Self {
        self.sub_qos = qos;
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_executor_capacity(mut self, capacity: usize) -> Self {
        self.executor_capacity = capacity;
        self
    }

    /// Defaults to [`ZNode::originator_id`].
    pub fn with_originator_id(mut self, originator_id: u32) -> Self {
        self.originator_id = Some(originator_id);
        self
    }

    pub fn with_handler<H: PongHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Box::new(handler);
        self
    }

    /// Cancel `token` once the timer has fired `ticks` times.
    pub fn with_tick_limit(mut self, ticks: u64, token: CancellationToken) -> Self {
        self.tick_limit = Some((ticks, token));
        self
    }
}

impl Builder for PingPongBuilder<'_> {
    type Output = PingPongNode;

    fn build(self) -> Result<PingPongNode, SetupError> {
        let originator_id = self
            .originator_id
            .unwrap_or_else(|| self.node.originator_id());

        let publisher = self
            .node
            .create_pub::<Message>(&self.pub_channel)
            .with_qos(self.pub_qos)
            .build()?;

        let mut executor = Executor::new(self.executor_capacity);
        let subscriber = self
            .node
            .create_sub::<Message>(&self.sub_channel)
            .with_qos(self.sub_qos)
            .with_guard_condition(executor.guard_condition())
            .build()?;
        let sub_channel = subscriber.channel().to_string();

        let tick_limit = self.tick_limit;
        executor.add_timer("ping_timer", Timer::new(self.period), move |app: &mut PingPong, _| {
            let result = app.publish_tick(SystemTime::now());
            if let Some((limit, token)) = &tick_limit {
                if app.stats.ticks >= *limit {
                    info!("[PING] Reached {} ticks, stopping", limit);
                    token.cancel();
                }
            }
            result.map_err(CallbackError::from)
        })?;
        executor.add_subscription("pong_subscription", subscriber, |app: &mut PingPong, msg: Message| {
            app.on_message(&msg).map(|_| ())
        })?;

        info!(
            "[PING] Ready: originator={}, pub={}, sub={}, period={:?}",
            originator_id,
            publisher.channel(),
            sub_channel,
            self.period
        );

        Ok(PingPongNode {
            app: PingPong {
                originator_id,
                buffer: FrameBuffer::new(self.buffer_capacity),
                publisher,
                sequence: SequenceCounter::default(),
                filter: SelfEchoFilter::default(),
                handler: self.handler,
                stats: PingPongStats::default(),
            },
            executor,
        })
    }
}

/// A [`PingPong`] together with the executor that drives it.
pub struct PingPongNode {
    app: PingPong,
    executor: Executor<PingPong>,
}

impl PingPongNode {
    pub fn app(&self) -> &PingPong {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut PingPong {
        &mut self.app
    }

    pub fn executor(&self) -> &Executor<PingPong> {
        &self.executor
    }

    pub fn spin_once(&mut self, timeout: Duration) -> Result<usize, ExecutorError> {
        self.executor.spin_once(&mut self.app, timeout)
    }

    pub fn spin(
        &mut self,
        token: &CancellationToken,
        spin_timeout: Duration,
        idle_interval: Duration,
    ) -> Result<(), ExecutorError> {
        self.executor
            .spin(&mut self.app, token, spin_timeout, idle_interval)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::context::ZContext;
    use crate::executor::HandleKind;
    use crate::msg::Time;
    use crate::transport::LoopbackTransport;

    type Seen = Rc<RefCell<Vec<String>>>;

    fn recorder(seen: &Seen) -> impl PongHandler + 'static {
        let seen = seen.clone();
        move |msg: &Message| -> Result<(), CallbackError> {
            seen.borrow_mut().push(msg.frame_label.clone());
            Ok(())
        }
    }

    #[test]
    fn test_sequence_counter_wraps_at_i32_max() {
        let mut seq = SequenceCounter::starting_at(i32::MAX as u32 - 1);
        assert_eq!(seq.advance(), i32::MAX as u32 - 1);
        assert_eq!(seq.advance(), i32::MAX as u32);
        assert_eq!(seq.advance(), 0);
        assert_eq!(seq.advance(), 1);
    }

    #[test]
    fn test_filter_before_first_publish() {
        let filter = SelfEchoFilter::default();
        assert_eq!(filter.last_published(), None);
        // An empty label never matches an unarmed filter
        assert!(!filter.is_echo(&Message::default()));
    }

    #[test]
    fn test_registers_timer_then_subscription() {
        let ctx = ZContext::loopback(0);
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let pp = PingPongBuilder::new(&node).build().unwrap();
        assert_eq!(
            pp.executor().registrations(),
            [
                ("ping_timer".to_string(), HandleKind::Timer),
                ("pong_subscription".to_string(), HandleKind::Subscription),
            ]
        );
        assert_eq!(pp.app().publisher().channel(), DEFAULT_PUB_CHANNEL);
        assert_eq!(pp.app().originator_id(), node.originator_id());
    }

    #[test]
    fn test_capacity_below_two_fails_setup() {
        let ctx = ZContext::loopback(0);
        let node = ctx.create_node("pubsub_node").build().unwrap();
        assert!(matches!(
            PingPongBuilder::new(&node).with_executor_capacity(1).build(),
            Err(SetupError::Capacity(_))
        ));
    }

    #[test]
    fn test_three_ticks_have_distinct_ids_and_ordered_stamps() {
        let bus = Arc::new(LoopbackTransport::new(0));
        let ctx = ZContext::with_transport(bus.clone());
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let mut pp = PingPongBuilder::new(&node)
            .with_originator_id(1804289383)
            .build()
            .unwrap();

        let observer = ZContext::with_transport(Arc::new(bus.peer()));
        let observer_node = observer.create_node("observer").build().unwrap();
        let pings = observer_node
            .create_sub::<Message>(DEFAULT_PUB_CHANNEL)
            .build()
            .unwrap();

        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        for i in 0..3 {
            pp.app_mut()
                .publish_tick(t0 + DEFAULT_PERIOD * i)
                .unwrap();
        }

        let received: Vec<Message> = std::iter::from_fn(|| pings.try_recv())
            .map(Result::unwrap)
            .collect();
        assert_eq!(received.len(), 3);
        let ids: Vec<u32> = received.iter().map(|m| m.sequence_id).collect();
        assert_eq!(ids, [0, 1, 2]);
        assert!(received.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(received[2].frame_label, "2_1804289383");
        assert_eq!(
            received[2].timestamp,
            Time {
                sec: 1_700_000_004,
                nanosec: 0
            }
        );
        assert_eq!(pp.app().stats().published, 3);
    }

    #[test]
    fn test_own_echo_is_not_forwarded() {
        let seen = Seen::default();
        let ctx = ZContext::loopback(0);
        let node = ctx.create_node("pubsub_node").build().unwrap();
        // Publishing onto the channel we listen on reflects every ping
        let mut pp = PingPongBuilder::new(&node)
            .with_sub_channel(DEFAULT_PUB_CHANNEL)
            .with_handler(recorder(&seen))
            .build()
            .unwrap();

        pp.app_mut().publish_tick(SystemTime::now()).unwrap();
        assert_eq!(pp.spin_once(Duration::ZERO).unwrap(), 1);

        let stats = pp.app().stats();
        assert_eq!(stats.echoes, 1);
        assert_eq!(stats.forwarded, 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_echo_check_is_idempotent() {
        let seen = Seen::default();
        let ctx = ZContext::loopback(0);
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let mut pp = PingPongBuilder::new(&node)
            .with_handler(recorder(&seen))
            .build()
            .unwrap();

        pp.app_mut().publish_tick(UNIX_EPOCH).unwrap();
        let echo = pp.app().buffer().message().clone();
        let buffer_before = echo.clone();

        for _ in 0..2 {
            assert_eq!(pp.app_mut().on_message(&echo).unwrap(), FilterOutcome::Echo);
        }
        assert!(seen.borrow().is_empty());
        assert_eq!(pp.app().buffer().message(), &buffer_before);
        assert_eq!(pp.app().filter().last_published(), Some(echo.frame_label.as_str()));
    }

    #[test]
    fn test_foreign_ping_is_forwarded() {
        let seen = Seen::default();
        let bus = Arc::new(LoopbackTransport::new(0));
        let ctx = ZContext::with_transport(bus.clone());
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let mut pp = PingPongBuilder::new(&node)
            .with_handler(recorder(&seen))
            .build()
            .unwrap();
        pp.app_mut().publish_tick(UNIX_EPOCH).unwrap();

        let remote = ZContext::with_transport(Arc::new(bus.peer()));
        let remote_node = remote.create_node("remote").build().unwrap();
        let remote_pub = remote_node
            .create_pub::<Message>(DEFAULT_SUB_CHANNEL)
            .build()
            .unwrap();
        // Same sequence id, different originator
        remote_pub
            .publish(&Message::new(0, 7, Time::default()))
            .unwrap();

        assert!(pp.spin_once(Duration::from_millis(100)).unwrap() >= 1);
        assert_eq!(*seen.borrow(), ["0_7"]);
        assert_eq!(pp.app().stats().forwarded, 1);
    }

    #[test]
    fn test_unavailable_channel_then_retry() {
        let bus = Arc::new(LoopbackTransport::new(0));
        let ctx = ZContext::with_transport(bus.clone());
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let mut pp = PingPongBuilder::new(&node).build().unwrap();

        bus.set_available(DEFAULT_PUB_CHANNEL, false);
        let err = pp.app_mut().publish_tick(UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, PublishError::ChannelUnavailable(ref c) if c == DEFAULT_PUB_CHANNEL));
        assert_eq!(pp.app().filter().last_published(), None);

        bus.set_available(DEFAULT_PUB_CHANNEL, true);
        pp.app_mut().publish_tick(UNIX_EPOCH).unwrap();
        let label = format!("1_{}", pp.app().originator_id());
        assert_eq!(pp.app().filter().last_published(), Some(label.as_str()));
        assert_eq!(pp.app().buffer().message().sequence_id, 1);

        let stats = pp.app().stats();
        assert_eq!((stats.ticks, stats.published, stats.publish_failures), (2, 1, 1));
    }

    #[test]
    fn test_overflow_is_reported_and_not_recorded() {
        let ctx = ZContext::loopback(0);
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let mut pp = PingPongBuilder::new(&node)
            .with_buffer_capacity(10)
            .with_originator_id(123456)
            .build()
            .unwrap();

        // "0_123456" fits, then the counter is pushed to five digits
        pp.app_mut().publish_tick(UNIX_EPOCH).unwrap();
        pp.app_mut().sequence = SequenceCounter::starting_at(12345);
        let err = pp.app_mut().publish_tick(UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, PublishError::BufferOverflow(_)));
        assert_eq!(pp.app().buffer().message().frame_label, "0_123456");
        assert_eq!(pp.app().filter().last_published(), Some("0_123456"));
    }

    #[test]
    fn test_tick_limit_cancels_spin() {
        let ctx = ZContext::loopback(0);
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let token = CancellationToken::new();
        let mut pp = PingPongBuilder::new(&node)
            .with_period(Duration::from_millis(5))
            .with_tick_limit(3, token.clone())
            .build()
            .unwrap();

        pp.spin(&token, Duration::from_millis(10), Duration::from_millis(1))
            .unwrap();
        assert_eq!(pp.app().stats().ticks, 3);
        assert_eq!(pp.app().stats().published, 3);
    }

    #[test]
    fn test_fatal_handler_halts_node() {
        let bus = Arc::new(LoopbackTransport::new(0));
        let ctx = ZContext::with_transport(bus.clone());
        let node = ctx.create_node("pubsub_node").build().unwrap();
        let mut pp = PingPongBuilder::new(&node)
            .with_period(Duration::from_secs(60))
            .with_handler(|_: &Message| -> Result<(), CallbackError> {
                Err(CallbackError::Fatal("handler gave up".into()))
            })
            .build()
            .unwrap();

        let remote = ZContext::with_transport(Arc::new(bus.peer()));
        let remote_node = remote.create_node("remote").build().unwrap();
        remote_node
            .create_pub::<Message>(DEFAULT_SUB_CHANNEL)
            .build()
            .unwrap()
            .publish(&Message::new(5, 9, Time::default()))
            .unwrap();

        let token = CancellationToken::new();
        let err = pp
            .spin(&token, Duration::from_millis(10), Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::CallbackFailure { ref source_name, .. } if source_name == "pong_subscription"
        ));
    }
}

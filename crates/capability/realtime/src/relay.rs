use crate::{RelayError, TopicFilter};
use api_contract::LiveUpdateMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// 实时转发参数。
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// 每个订阅者的队列容量
    pub queue_capacity: usize,
    /// 连续丢弃达到该值即强制断开
    pub disconnect_threshold: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            disconnect_threshold: 64,
        }
    }
}

/// 订阅者状态：subscribing → active → closing → closed。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Subscribing,
    Active,
    Closing,
    Closed,
}

impl SubscriberState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SubscriberState::Subscribing,
            1 => SubscriberState::Active,
            2 => SubscriberState::Closing,
            _ => SubscriberState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SubscriberState::Subscribing => 0,
            SubscriberState::Active => 1,
            SubscriberState::Closing => 2,
            SubscriberState::Closed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberState::Subscribing => "subscribing",
            SubscriberState::Active => "active",
            SubscriberState::Closing => "closing",
            SubscriberState::Closed => "closed",
        }
    }
}

/// 一次分发的统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub matched: usize,
    pub dropped: usize,
    pub disconnected: usize,
}

type Queued = Arc<LiveUpdateMessage>;

struct SubscriberSlot {
    id: u64,
    filter: TopicFilter,
    queue: Mutex<VecDeque<Queued>>,
    notify: Notify,
    state: AtomicU8,
    dropped: AtomicU64,
    overflow_streak: AtomicU32,
}

impl SubscriberSlot {
    fn state(&self) -> SubscriberState {
        SubscriberState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SubscriberState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RelayInner {
    config: RelayConfig,
    subscribers: RwLock<HashMap<u64, Arc<SubscriberSlot>>>,
    next_id: AtomicU64,
}

impl RelayInner {
    fn remove(&self, id: u64) -> Option<Arc<SubscriberSlot>> {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

/// 实时转发器（可克隆）。
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(RelayConfig::default())
    }
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let config = RelayConfig {
            queue_capacity: config.queue_capacity.max(1),
            disconnect_threshold: config.disconnect_threshold.max(1),
        };
        Self {
            inner: Arc::new(RelayInner {
                config,
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// 新建订阅；`filter` 为空表示接收全部 topic。
    pub fn subscribe(&self, filter: Option<&str>) -> Result<Subscription, RelayError> {
        let filter = match filter {
            Some(raw) => TopicFilter::parse(raw)?,
            None => TopicFilter::all(),
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let slot = Arc::new(SubscriberSlot {
            id,
            filter,
            queue: Mutex::new(VecDeque::with_capacity(self.inner.config.queue_capacity)),
            notify: Notify::new(),
            state: AtomicU8::new(SubscriberState::Subscribing.as_u8()),
            dropped: AtomicU64::new(0),
            overflow_streak: AtomicU32::new(0),
        });
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, slot.clone());
        slot.set_state(SubscriberState::Active);
        info!(
            target: "ems.relay",
            subscriber_id = id,
            filter = %slot.filter,
            "relay_subscribed"
        );
        Ok(Subscription {
            slot,
            relay: Arc::downgrade(&self.inner),
        })
    }

    /// 当前在册订阅者数量。
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|map| map.len())
            .unwrap_or(0)
    }

    /// 把消息推给所有匹配的活跃订阅者。
    pub fn dispatch(&self, message: LiveUpdateMessage) -> DispatchReport {
        let message = Arc::new(message);
        let mut report = DispatchReport::default();
        let mut forced = Vec::new();
        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for slot in subscribers.values() {
                if slot.state() != SubscriberState::Active || !slot.filter.matches(&message.topic)
                {
                    continue;
                }
                report.matched += 1;
                let overflowed = {
                    let mut queue = slot.lock_queue();
                    let overflowed = if queue.len() >= self.inner.config.queue_capacity {
                        queue.pop_front();
                        true
                    } else {
                        false
                    };
                    queue.push_back(message.clone());
                    overflowed
                };
                ems_telemetry::record_relay_delivered();
                if overflowed {
                    report.dropped += 1;
                    slot.dropped.fetch_add(1, Ordering::SeqCst);
                    ems_telemetry::record_relay_drop();
                    let streak = slot.overflow_streak.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(
                        target: "ems.relay",
                        subscriber_id = slot.id,
                        streak,
                        "relay_subscriber_drop"
                    );
                    if streak >= self.inner.config.disconnect_threshold {
                        slot.set_state(SubscriberState::Closing);
                        forced.push(slot.id);
                    }
                }
                slot.notify.notify_one();
            }
        }
        for id in forced {
            if let Some(slot) = self.inner.remove(id) {
                report.disconnected += 1;
                ems_telemetry::record_relay_forced_disconnect();
                warn!(
                    target: "ems.relay",
                    subscriber_id = id,
                    dropped = slot.dropped.load(Ordering::SeqCst),
                    "relay_subscriber_disconnected"
                );
                slot.lock_queue().clear();
                slot.set_state(SubscriberState::Closed);
                slot.notify.notify_one();
            }
        }
        report
    }
}

/// 订阅句柄；释放即退订。
pub struct Subscription {
    slot: Arc<SubscriberSlot>,
    relay: Weak<RelayInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    pub fn state(&self) -> SubscriberState {
        self.slot.state()
    }

    /// 因队列满被丢弃的消息数。
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::SeqCst)
    }

    /// 取出一条排队消息，不等待。
    pub fn try_recv(&self) -> Option<Arc<LiveUpdateMessage>> {
        if self.slot.state() != SubscriberState::Active {
            return None;
        }
        let message = self.slot.lock_queue().pop_front();
        if message.is_some() {
            self.slot.overflow_streak.store(0, Ordering::SeqCst);
        }
        message
    }

    /// 等待下一条消息；订阅被关闭后返回 `None`。
    pub async fn recv(&self) -> Option<Arc<LiveUpdateMessage>> {
        loop {
            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if self.slot.state() != SubscriberState::Active {
                return None;
            }
            self.slot.notify.notified().await;
        }
    }

    /// 主动退订。
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.upgrade() {
            relay.remove(self.slot.id);
        }
        self.slot.set_state(SubscriberState::Closed);
        self.slot.lock_queue().clear();
        info!(
            target: "ems.relay",
            subscriber_id = self.slot.id,
            dropped = self.slot.dropped.load(Ordering::SeqCst),
            "relay_unsubscribed"
        );
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::events::Event;

// 每个订阅者最多积压的事件数，超过后视为发送失败
const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

pub type SubscriberId = u64;

/// 当前的更新投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// 有订阅者连接，每轮同步后主动推送
    Push,
    /// 没有订阅者，只响应拉取查询
    Poll,
}

/// 一个推送订阅，接收端被丢弃后下一次推送会把它移出订阅集合
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    receiver: mpsc::Receiver<Arc<Event>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// 把同步结果分发给所有推送订阅者
///
/// 发送永远不会阻塞：订阅者的缓冲区满了或已经断开，就直接把它移除，
/// 不影响其他订阅者。
#[derive(Debug)]
pub struct BroadcastHub {
    subscribers: DashMap<SubscriberId, mpsc::Sender<Arc<Event>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.subscribers.insert(id, sender);
        debug!("订阅者 {} 已连接，当前 {} 个", id, self.subscribers.len());
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!("订阅者 {} 已断开", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        if self.subscribers.is_empty() {
            DeliveryMode::Poll
        } else {
            DeliveryMode::Push
        }
    }

    pub fn publish(&self, event: Event) -> PublishReport {
        if self.subscribers.is_empty() {
            return PublishReport::default();
        }

        let event = Arc::new(event);
        let mut report = PublishReport::default();
        self.subscribers.retain(|id, sender| {
            match sender.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(e) => {
                    debug!("订阅者 {} 推送失败，移除: {}", id, e);
                    report.dropped += 1;
                    false
                }
            }
        });
        report
    }
}

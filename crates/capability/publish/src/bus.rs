use crate::PublishError;
use tokio::sync::broadcast;

/// 总线消息（topic + 原始载荷）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// 消息总线发布端，`try_publish` 不得阻塞。
pub trait BusPublisher: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_publish(&self, message: BusMessage) -> Result<(), PublishError>;
}

/// 进程内总线：发布端与实时转发在同一进程时使用。
#[derive(Clone)]
pub struct InProcessBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl BusPublisher for InProcessBus {
    fn name(&self) -> &'static str {
        "local"
    }

    /// 没有订阅者时消息直接丢弃，不视为失败。
    fn try_publish(&self, message: BusMessage) -> Result<(), PublishError> {
        let _ = self.sender.send(message);
        Ok(())
    }
}

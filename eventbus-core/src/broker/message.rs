use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Str(String),
}

impl HeaderValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            Self::Int(_) => None,
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

/// 消息属性
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicProperties {
    pub headers: Headers,
    /// 2 = 持久化
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub content_type: Option<String>,
}

impl BasicProperties {
    /// "persistent text" 配置：持久化投递、优先级 0、`text/plain`
    pub fn persistent_text_plain() -> Self {
        Self {
            headers: Headers::new(),
            delivery_mode: Some(2),
            priority: Some(0),
            content_type: Some("text/plain".to_string()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }
}

/// 待发布消息；载荷以 `Arc<[u8]>` 共享，同一事件发往多个路由键时只编码一次
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Arc<[u8]>,
}

impl OutboundMessage {
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        properties: BasicProperties,
        body: Arc<[u8]>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            properties,
            body,
        }
    }
}

/// 投递结算的 broker 侧实现
pub trait Acknowledger: Send + Sync {
    fn ack(&self);

    fn nack(&self, requeue: bool);
}

/// 需要手动确认的投递
///
/// `ack`/`nack` 只有第一次调用生效；未结算即被丢弃的投递会重新入队，
/// 与 broker 在 channel 关闭时的行为一致。
pub struct AcknowledgableDelivery {
    body: Option<Arc<[u8]>>,
    routing_key: String,
    properties: BasicProperties,
    redelivered: bool,
    acknowledger: Box<dyn Acknowledger>,
    settled: AtomicBool,
}

impl AcknowledgableDelivery {
    pub fn new(
        body: Option<Arc<[u8]>>,
        routing_key: impl Into<String>,
        properties: BasicProperties,
        redelivered: bool,
        acknowledger: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            routing_key: routing_key.into(),
            properties,
            redelivered,
            acknowledger,
            settled: AtomicBool::new(false),
        }
    }

    pub fn body(&self) -> Option<&Arc<[u8]>> {
        self.body.as_ref()
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    pub fn ack(&self) {
        if self.settle() {
            self.acknowledger.ack();
        }
    }

    pub fn nack(&self, requeue: bool) {
        if self.settle() {
            self.acknowledger.nack(requeue);
        }
    }

    fn settle(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for AcknowledgableDelivery {
    fn drop(&mut self) {
        if self.settle() {
            self.acknowledger.nack(true);
        }
    }
}

impl fmt::Debug for AcknowledgableDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcknowledgableDelivery")
            .field("routing_key", &self.routing_key)
            .field("properties", &self.properties)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .field("redelivered", &self.redelivered)
            .field("settled", &self.is_settled())
            .finish()
    }
}

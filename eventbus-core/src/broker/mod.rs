//! 消息中间件协议（broker）
//!
//! 事件总线只通过这里定义的窄接口与 broker 交互：
//! - `Sender`：声明交换机/队列、绑定/解绑、删除队列、发布消息；
//! - `Receiver`：以手动确认模式消费队列，返回 `'static` 生命周期的投递流；
//! - `ReceiverProvider`：为每个注册创建独立的 `Receiver`。
//!
//! 连接与 channel 池化属于具体实现的职责。`InMemoryBroker`（`in-memory` 特性）
//! 提供 direct 路由、持久命名队列、竞争消费、预取窗口与死信交换机参数的进程内实现。
//!
mod message;
mod topology;

#[cfg(feature = "in-memory")]
mod in_memory;

pub use message::{
    AcknowledgableDelivery, Acknowledger, BasicProperties, HeaderValue, Headers, OutboundMessage,
};
pub use topology::{
    BindingSpecification, DEAD_LETTER_EXCHANGE_ARGUMENT, EMPTY_ROUTING_KEY, ExchangeSpecification,
    ExchangeType, QueueSpecification,
};

#[cfg(feature = "in-memory")]
pub use in_memory::InMemoryBroker;

use crate::error::EventBusResult as Result;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use std::sync::Arc;

/// 发布与拓扑管理
#[async_trait]
pub trait Sender: Send + Sync {
    /// 声明交换机；同名同类型重复声明为幂等
    async fn declare_exchange(&self, spec: ExchangeSpecification) -> Result<()>;

    /// 声明队列；同名同属性重复声明为幂等
    async fn declare_queue(&self, spec: QueueSpecification) -> Result<()>;

    async fn bind(&self, binding: BindingSpecification) -> Result<()>;

    async fn unbind(&self, binding: BindingSpecification) -> Result<()>;

    async fn delete_queue(&self, queue: &str) -> Result<()>;

    /// 发布一批消息，任一条失败即返回错误
    async fn send(&self, messages: Vec<OutboundMessage>) -> Result<()>;
}

/// 手动确认模式的消费者
#[async_trait]
pub trait Receiver: Send + Sync {
    /// 订阅队列；`prefetch` 为未确认投递的上限
    async fn consume_manual_ack(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<BoxStream<'static, AcknowledgableDelivery>>;

    /// 关闭消费者，已取出但尚未结算的投递会被重新入队
    fn close(&self);
}

pub trait ReceiverProvider: Send + Sync {
    fn create_receiver(&self) -> Arc<dyn Receiver>;
}

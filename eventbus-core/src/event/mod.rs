//! 事件模型（event）
//!
//! 定义在总线上流转的事件需要实现的最小接口（`Event`）、事件相关标识
//! （`EventId`、`Username`、`MailboxId`、`EventBusId`），以及事件与字节载荷
//! 之间的编解码协议（`EventSerializer`）。

mod event_trait;
mod ids;
mod serializer;

pub use event_trait::Event;
pub use ids::{EventBusId, EventId, MailboxId, Username};
pub use serializer::{EventSerializer, JsonEventSerializer};

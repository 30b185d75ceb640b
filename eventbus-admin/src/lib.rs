//! 事件总线运维（eventbus-admin）
//!
//! 以命令的形式暴露死信重投递：
//! - `RedeliverAllEvents`：重投递全部死信；
//! - `RedeliverGroupEvents`：重投递某个组的死信；
//! - `RedeliverEvent`：重投递单条死信。
//!
//! 命令经 `InMemoryCommandBus` 路由到 `RedeliverService`，结果为 `RedeliveryReport`。
//!
pub mod command;
pub mod command_bus;
pub mod command_handler;
pub mod context;
pub mod error;
pub mod inmemory_command_bus;
pub mod redeliver;

pub use error::{AdminError, AdminResult};
pub use inmemory_command_bus::InMemoryCommandBus;
pub use redeliver::{
    RedeliverAllEvents, RedeliverEvent, RedeliverGroupEvents, RedeliverService, RedeliveryReport,
};

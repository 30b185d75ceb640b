//! 事件监听器（listener）
//!
//! - `EventListener`：监听器协议，声明执行模式与感兴趣的事件；
//! - `ListenerExecutor`：统一的执行入口，负责过滤、追踪与耗时记录；
//! - `LocalListenerRegistry`：进程内按 `RegistrationKey` 组织的监听器表。
//!
mod executor;
mod registry;

pub use executor::{ExecutionContext, ListenerExecutor};
pub use registry::{LocalListenerRegistry, LocalRegistration, RemovalReference, RemovalResult};

use crate::event::Event;
use async_trait::async_trait;

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// 在分发调用内同步执行（仅对本地 key 监听器生效）
    Synchronous,
    /// 经 broker 异步投递后执行
    #[default]
    Asynchronous,
}

/// 事件监听器
///
/// 同一事件可能被投递多次（重试、重投递），实现需保证幂等。
#[async_trait]
pub trait EventListener<E: Event>: Send + Sync {
    /// 监听器名称（用于日志与追踪）
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::default()
    }

    /// 是否处理该事件；返回 false 时直接跳过
    fn is_handling(&self, _event: &E) -> bool {
        true
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}

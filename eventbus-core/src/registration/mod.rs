//! 注册与拓扑命名（registration）
//!
//! - `Group`：分布式监听组，同名组跨节点共享一个持久工作队列；
//! - `RegistrationKey`：按 key（邮箱/用户）订阅事件子集的选择器；
//! - `RoutingKey` / `RoutingKeyConverter`：key 与线上路由键之间的无损互转；
//! - `NamingStrategy`：由总线前缀推导交换机、队列等拓扑名称；
//! - `Registration`：一次活动注册的句柄，负责退订与资源释放。
//!
mod group;
mod naming;
mod registration_key;
mod routing_key;

pub use group::Group;
pub use naming::NamingStrategy;
pub use registration_key::RegistrationKey;
pub use routing_key::{RoutingKey, RoutingKeyConverter};

use async_trait::async_trait;

/// 活动注册：持有 broker 订阅或本地监听器，退订后释放
#[async_trait]
pub trait Registration: Send + Sync {
    /// 退订；重复调用无副作用
    async fn unregister(&self);
}

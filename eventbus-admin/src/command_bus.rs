use crate::{command::Command, context::AdminContext, error::AdminResult};
use async_trait::async_trait;

/// 命令总线（Command Bus）
///
/// - 根据命令的具体类型路由到对应的处理器；
/// - 该 trait 带有泛型方法，以具体实现类型注入使用。
#[async_trait]
pub trait CommandBus: Send + Sync {
    /// 分发命令到对应处理器并返回其结果
    async fn dispatch<C>(&self, ctx: &AdminContext, cmd: C) -> AdminResult<C::Output>
    where
        C: Command;
}

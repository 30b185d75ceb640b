use crate::{command::Command, context::AdminContext, error::AdminResult};
use async_trait::async_trait;

#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Command,
{
    async fn handle(&self, ctx: &AdminContext, cmd: C) -> AdminResult<C::Output>;
}

use crate::{
    command::Command,
    command_bus::CommandBus,
    command_handler::CommandHandler,
    context::AdminContext,
    error::{AdminError, AdminResult},
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type ErasedOutput = Box<dyn Any + Send>;

type CmdHandlerFuture<'a> = Pin<Box<dyn Future<Output = AdminResult<ErasedOutput>> + Send + 'a>>;

type CmdHandlerFn = Arc<
    dyn for<'a> Fn(Box<dyn Any + Send>, &'a AdminContext) -> CmdHandlerFuture<'a> + Send + Sync,
>;

// 通过泛型约束固定闭包签名，使其对任意 `'a` 成立
fn erase<F>(f: F) -> CmdHandlerFn
where
    F: for<'a> Fn(Box<dyn Any + Send>, &'a AdminContext) -> CmdHandlerFuture<'a>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// 基于内存的 CommandBus 实现
/// - 通过 TypeId 注册不同 Command 对应的 Handler，每种命令只允许一个
/// - 运行时以类型擦除（Any）方式调度，命令与结果都在边界处还原
#[derive(Default)]
pub struct InMemoryCommandBus {
    handlers: DashMap<TypeId, CmdHandlerFn>,
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令处理器；同一命令重复注册返回 `AlreadyRegisteredCommand`
    pub fn register<C, H>(&self, handler: Arc<H>) -> AdminResult<()>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let f = erase(move |boxed_cmd, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                // 键与闭包同一泛型 C，这里的 downcast 不会失败
                let cmd = boxed_cmd
                    .downcast::<C>()
                    .map_err(|_| AdminError::TypeMismatch {
                        expected: C::NAME,
                        found: "unknown",
                    })?;
                let output: ErasedOutput = Box::new(handler.handle(ctx, *cmd).await?);
                Ok::<_, AdminError>(output)
            })
        });

        match self.handlers.entry(TypeId::of::<C>()) {
            Entry::Occupied(_) => Err(AdminError::AlreadyRegisteredCommand { command: C::NAME }),
            Entry::Vacant(slot) => {
                slot.insert(f);
                Ok(())
            }
        }
    }

    pub fn is_registered<C: Command>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<C>())
    }
}

#[async_trait]
impl CommandBus for InMemoryCommandBus {
    async fn dispatch<C: Command>(&self, ctx: &AdminContext, cmd: C) -> AdminResult<C::Output> {
        let Some(f) = self.handlers.get(&TypeId::of::<C>()).map(|h| h.clone()) else {
            return Err(AdminError::HandlerNotFound(C::NAME));
        };

        let output = (f)(Box::new(cmd), ctx).await?;
        output
            .downcast::<C::Output>()
            .map(|o| *o)
            .map_err(|_| AdminError::TypeMismatch {
                expected: type_name::<C::Output>(),
                found: "unknown",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping(usize);

    impl Command for Ping {
        const NAME: &'static str = "Ping";
        type Output = usize;
    }

    struct Unregistered;

    impl Command for Unregistered {
        const NAME: &'static str = "Unregistered";
        type Output = ();
    }

    #[derive(Default)]
    struct PingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandHandler<Ping> for PingHandler {
        async fn handle(&self, _ctx: &AdminContext, cmd: Ping) -> AdminResult<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(cmd.0 * 2)
        }
    }

    #[tokio::test]
    async fn routes_command_and_returns_output() {
        let bus = InMemoryCommandBus::new();
        let handler = Arc::new(PingHandler::default());
        bus.register::<Ping, _>(handler.clone()).unwrap();

        let out = bus.dispatch(&AdminContext::new(), Ping(21)).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(bus.is_registered::<Ping>());
    }

    #[tokio::test]
    async fn unknown_command_is_handler_not_found() {
        let bus = InMemoryCommandBus::new();
        let err = bus
            .dispatch(&AdminContext::new(), Unregistered)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::HandlerNotFound("Unregistered")));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let bus = InMemoryCommandBus::new();
        bus.register::<Ping, _>(Arc::new(PingHandler::default()))
            .unwrap();
        let err = bus
            .register::<Ping, _>(Arc::new(PingHandler::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            AdminError::AlreadyRegisteredCommand { command: "Ping" }
        ));
    }
}

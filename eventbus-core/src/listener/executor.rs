use super::EventListener;
use crate::event::Event;
use crate::registration::{Group, RegistrationKey};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::Instrument;

/// 执行上下文：监听器经由哪个组或哪个 key 收到事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionContext {
    Group(Group),
    Key(RegistrationKey),
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(group) => write!(f, "group={group}"),
            Self::Key(key) => write!(f, "registration_key={key}"),
        }
    }
}

/// 监听器执行器
///
/// 跳过 `is_handling` 为 false 的事件；在携带事件与上下文字段的 span 中执行，
/// 并以 debug 级别记录耗时。失败原样返回，由调用方决定记录或重试；
/// 监听器 panic 被捕获并转换为普通失败，不会中断消费任务或分发调用。
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerExecutor;

impl ListenerExecutor {
    pub async fn execute<E: Event>(
        &self,
        listener: &dyn EventListener<E>,
        context: &ExecutionContext,
        event: &E,
    ) -> anyhow::Result<()> {
        if !listener.is_handling(event) {
            return Ok(());
        }

        let span = tracing::info_span!(
            "listener.execute",
            event_id = %event.event_id(),
            event_type = event.event_type(),
            username = %event.username(),
            listener = listener.name(),
            context = %context,
        );

        async {
            let started = Instant::now();
            let result = match AssertUnwindSafe(listener.handle(event)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(anyhow::anyhow!(
                    "listener panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            tracing::debug!(
                duration_ms = started.elapsed().as_millis() as u64,
                success = result.is_ok(),
                "listener executed"
            );
            result
        }
        .instrument(span)
        .await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventId, Username};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct Ping {
        id: EventId,
        user: Username,
    }

    impl Event for Ping {
        fn event_id(&self) -> &EventId {
            &self.id
        }
        fn username(&self) -> &Username {
            &self.user
        }
        fn event_type(&self) -> &str {
            "Ping"
        }
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
        handling: bool,
        fail: bool,
    }

    struct Panicking;

    #[async_trait]
    impl EventListener<Ping> for Panicking {
        async fn handle(&self, event: &Ping) -> anyhow::Result<()> {
            panic!("index corrupted for {}", event.user);
        }
    }

    #[async_trait]
    impl EventListener<Ping> for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn is_handling(&self, _event: &Ping) -> bool {
            self.handling
        }

        async fn handle(&self, _event: &Ping) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    fn ping() -> Ping {
        Ping {
            id: EventId::random(),
            user: Username::new("bob"),
        }
    }

    #[tokio::test]
    async fn skips_events_the_listener_does_not_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = Counting {
            calls: calls.clone(),
            handling: false,
            fail: true,
        };
        let ctx = ExecutionContext::Group(Group::new("g"));

        ListenerExecutor.execute(&listener, &ctx, &ping()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn propagates_listener_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener = Counting {
            calls: calls.clone(),
            handling: true,
            fail: true,
        };
        let ctx = ExecutionContext::Key(RegistrationKey::User(Username::new("bob")));

        let err = ListenerExecutor
            .execute(&listener, &ctx, &ping())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_listener_becomes_a_failure() {
        let ctx = ExecutionContext::Group(Group::new("search-index"));

        let err = ListenerExecutor
            .execute(&Panicking, &ctx, &ping())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "listener panicked: index corrupted for bob");
    }

    #[test]
    fn context_display() {
        assert_eq!(
            ExecutionContext::Group(Group::new("search-index")).to_string(),
            "group=search-index"
        );
        assert_eq!(
            ExecutionContext::Key(RegistrationKey::User(Username::new("bob"))).to_string(),
            "registration_key=user:bob"
        );
    }
}

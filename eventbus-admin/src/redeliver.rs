//! 死信重投递（RedeliverService）
//!
//! 每条死信经 `EventBus::re_deliver` 投递回原组，成功后才从死信存储移除；
//! 失败的条目保留原样，等待下一次重投递。
//!
use crate::command::Command;
use crate::command_handler::CommandHandler;
use crate::context::AdminContext;
use crate::error::{AdminError, AdminResult};
use crate::inmemory_command_bus::InMemoryCommandBus;
use async_trait::async_trait;
use eventbus_core::dead_letters::{EventDeadLetters, InsertionId};
use eventbus_core::event::Event;
use eventbus_core::eventing::EventBus;
use eventbus_core::registration::Group;
use serde::Serialize;
use std::sync::Arc;

/// 一次重投递的结果汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RedeliveryReport {
    pub successful: usize,
    pub failed: usize,
}

impl RedeliveryReport {
    /// 全部成功（包括没有条目的情况）
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, redelivered: bool) {
        if redelivered {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    fn merge(&mut self, other: RedeliveryReport) {
        self.successful += other.successful;
        self.failed += other.failed;
    }
}

/// 重投递全部死信
#[derive(Debug, Clone, Copy, Default)]
pub struct RedeliverAllEvents;

impl Command for RedeliverAllEvents {
    const NAME: &'static str = "RedeliverAllEvents";
    type Output = RedeliveryReport;
}

/// 重投递某个组的全部死信
#[derive(Debug, Clone)]
pub struct RedeliverGroupEvents {
    pub group: Group,
}

impl Command for RedeliverGroupEvents {
    const NAME: &'static str = "RedeliverGroupEvents";
    type Output = RedeliveryReport;
}

/// 重投递单条死信
#[derive(Debug, Clone)]
pub struct RedeliverEvent {
    pub group: Group,
    pub insertion_id: InsertionId,
}

impl Command for RedeliverEvent {
    const NAME: &'static str = "RedeliverEvent";
    type Output = RedeliveryReport;
}

pub struct RedeliverService<E: Event> {
    bus: Arc<EventBus<E>>,
}

impl<E: Event> RedeliverService<E> {
    pub fn new(bus: Arc<EventBus<E>>) -> Self {
        Self { bus }
    }

    /// 把三种重投递命令注册到命令总线
    pub fn register_on(self: &Arc<Self>, commands: &InMemoryCommandBus) -> AdminResult<()> {
        commands.register::<RedeliverAllEvents, _>(self.clone())?;
        commands.register::<RedeliverGroupEvents, _>(self.clone())?;
        commands.register::<RedeliverEvent, _>(self.clone())?;
        Ok(())
    }

    pub async fn redeliver_all(&self) -> AdminResult<RedeliveryReport> {
        let mut report = RedeliveryReport::default();
        for group in self.dead_letters().groups_with_failed_events().await? {
            report.merge(self.redeliver_group(&group).await?);
        }
        Ok(report)
    }

    pub async fn redeliver_group(&self, group: &Group) -> AdminResult<RedeliveryReport> {
        let mut report = RedeliveryReport::default();
        for insertion_id in self.dead_letters().failed_ids(group).await? {
            // 枚举与读取之间条目可能已被并发移除
            let Some(event) = self.dead_letters().failed_event(group, &insertion_id).await? else {
                continue;
            };
            report.record(self.redeliver_entry(group, &insertion_id, &event).await);
        }
        Ok(report)
    }

    pub async fn redeliver_single(
        &self,
        group: &Group,
        insertion_id: &InsertionId,
    ) -> AdminResult<RedeliveryReport> {
        let event = self
            .dead_letters()
            .failed_event(group, insertion_id)
            .await?
            .ok_or_else(|| AdminError::DeadLetterNotFound {
                group: group.clone(),
                insertion_id: *insertion_id,
            })?;

        let mut report = RedeliveryReport::default();
        report.record(self.redeliver_entry(group, insertion_id, &event).await);
        Ok(report)
    }

    fn dead_letters(&self) -> &Arc<dyn EventDeadLetters<E>> {
        self.bus.dead_letters()
    }

    async fn redeliver_entry(&self, group: &Group, insertion_id: &InsertionId, event: &E) -> bool {
        let outcome = async {
            self.bus.re_deliver(group, event).await?;
            self.dead_letters().remove(group, insertion_id).await
        }
        .await;

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    group = %group,
                    insertion_id = %insertion_id,
                    event_id = %event.event_id(),
                    "dead letter redelivered"
                );
                true
            }
            Err(err) => {
                tracing::error!(
                    group = %group,
                    insertion_id = %insertion_id,
                    event_id = %event.event_id(),
                    event_type = event.event_type(),
                    error = %err,
                    "dead letter redelivery failed"
                );
                false
            }
        }
    }
}

fn log_report(ctx: &AdminContext, command: &'static str, report: &RedeliveryReport) {
    tracing::info!(
        command,
        actor = ctx.actor.as_deref().unwrap_or("-"),
        correlation_id = ctx.correlation_id.as_deref().unwrap_or("-"),
        successful = report.successful,
        failed = report.failed,
        "redelivery finished"
    );
}

#[async_trait]
impl<E: Event> CommandHandler<RedeliverAllEvents> for RedeliverService<E> {
    async fn handle(
        &self,
        ctx: &AdminContext,
        _cmd: RedeliverAllEvents,
    ) -> AdminResult<RedeliveryReport> {
        let report = self.redeliver_all().await?;
        log_report(ctx, RedeliverAllEvents::NAME, &report);
        Ok(report)
    }
}

#[async_trait]
impl<E: Event> CommandHandler<RedeliverGroupEvents> for RedeliverService<E> {
    async fn handle(
        &self,
        ctx: &AdminContext,
        cmd: RedeliverGroupEvents,
    ) -> AdminResult<RedeliveryReport> {
        let report = self.redeliver_group(&cmd.group).await?;
        log_report(ctx, RedeliverGroupEvents::NAME, &report);
        Ok(report)
    }
}

#[async_trait]
impl<E: Event> CommandHandler<RedeliverEvent> for RedeliverService<E> {
    async fn handle(&self, ctx: &AdminContext, cmd: RedeliverEvent) -> AdminResult<RedeliveryReport> {
        let report = self
            .redeliver_single(&cmd.group, &cmd.insertion_id)
            .await?;
        log_report(ctx, RedeliverEvent::NAME, &report);
        Ok(report)
    }
}

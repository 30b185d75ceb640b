use crate::broker::{
    BasicProperties, BindingSpecification, EMPTY_ROUTING_KEY, ExchangeSpecification, ExchangeType,
    OutboundMessage, Sender,
};
use crate::config::RetryBackoffConfig;
use crate::dead_letters::EventDeadLetters;
use crate::error::EventBusResult as Result;
use crate::event::{Event, EventSerializer};
use crate::registration::{Group, NamingStrategy};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// 记录重试次数的消息头
pub const RETRY_COUNT_HEADER: &str = "retry-count";

/// 从消息属性读取重试次数；缺失或非整数时为 0
pub fn retry_count_of(properties: &BasicProperties) -> u32 {
    properties
        .header(RETRY_COUNT_HEADER)
        .and_then(|v| v.as_int())
        .map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// 组消费失败后的重试策略
///
/// 未达上限时，事件带着 `retry-count + 1` 发往该组的重试交换机，
/// 重试交换机以空路由键绑定到组工作队列，于是只有本组会再次收到；
/// 达到上限（或重投发布失败）时写入该组的死信。
pub struct GroupConsumerRetry<E: Event> {
    sender: Arc<dyn Sender>,
    group: Group,
    retry_exchange: String,
    retry_backoff: RetryBackoffConfig,
    dead_letters: Arc<dyn EventDeadLetters<E>>,
    serializer: Arc<dyn EventSerializer<E>>,
    declared: OnceCell<()>,
}

impl<E: Event> GroupConsumerRetry<E> {
    pub fn new(
        sender: Arc<dyn Sender>,
        naming: &NamingStrategy,
        group: Group,
        retry_backoff: RetryBackoffConfig,
        dead_letters: Arc<dyn EventDeadLetters<E>>,
        serializer: Arc<dyn EventSerializer<E>>,
    ) -> Self {
        Self {
            sender,
            retry_exchange: naming.retry_exchange(&group),
            group,
            retry_backoff,
            dead_letters,
            serializer,
            declared: OnceCell::new(),
        }
    }

    pub fn retry_exchange(&self) -> &str {
        &self.retry_exchange
    }

    /// 声明重试交换机并绑定到工作队列；同一实例只执行一次（失败可再次尝试）
    pub async fn create_retry_exchange(&self, work_queue: &str) -> Result<()> {
        self.declared
            .get_or_try_init(|| async {
                self.sender
                    .declare_exchange(
                        ExchangeSpecification::builder()
                            .name(self.retry_exchange.clone())
                            .exchange_type(ExchangeType::Direct)
                            .durable(true)
                            .build(),
                    )
                    .await?;
                self.sender
                    .bind(
                        BindingSpecification::builder()
                            .exchange(self.retry_exchange.clone())
                            .queue(work_queue)
                            .routing_key(EMPTY_ROUTING_KEY)
                            .build(),
                    )
                    .await
            })
            .await
            .map(|_| ())
    }

    /// 监听器失败后的处理；`payload` 为收到的原始载荷，存在时直接复用
    pub async fn handle_retry(
        &self,
        event: &E,
        payload: Option<Arc<[u8]>>,
        current_retry_count: u32,
        cause: &anyhow::Error,
    ) -> Result<()> {
        tracing::error!(
            group = %self.group,
            event_id = %event.event_id(),
            event_type = event.event_type(),
            username = %event.username(),
            retry_count = current_retry_count,
            error = %cause,
            "group listener failed"
        );
        self.retry_or_store(event, payload, current_retry_count).await
    }

    pub async fn retry_or_store_to_dead_letter(
        &self,
        event: &E,
        current_retry_count: u32,
    ) -> Result<()> {
        self.retry_or_store(event, None, current_retry_count).await
    }

    async fn retry_or_store(
        &self,
        event: &E,
        payload: Option<Arc<[u8]>>,
        current_retry_count: u32,
    ) -> Result<()> {
        if current_retry_count >= self.retry_backoff.max_retries {
            return self.store_to_dead_letter(event).await;
        }

        let body = match payload {
            Some(body) => body,
            None => match self.serializer.to_json(event) {
                Ok(json) => Arc::from(json.into_bytes()),
                Err(err) => {
                    tracing::error!(
                        group = %self.group,
                        event_id = %event.event_id(),
                        error = %err,
                        "event can not be serialized for retry"
                    );
                    return self.store_to_dead_letter(event).await;
                }
            },
        };

        let properties = BasicProperties::persistent_text_plain()
            .with_header(RETRY_COUNT_HEADER, i64::from(current_retry_count + 1));
        let message = OutboundMessage::new(
            self.retry_exchange.clone(),
            EMPTY_ROUTING_KEY,
            properties,
            body,
        );

        if let Err(err) = self.sender.send(vec![message]).await {
            tracing::error!(
                group = %self.group,
                event_id = %event.event_id(),
                retry_count = current_retry_count,
                error = %err,
                "retry publish failed"
            );
            return self.store_to_dead_letter(event).await;
        }
        Ok(())
    }

    async fn store_to_dead_letter(&self, event: &E) -> Result<()> {
        let insertion_id = self.dead_letters.store(&self.group, event).await?;
        tracing::error!(
            group = %self.group,
            event_id = %event.event_id(),
            event_type = event.event_type(),
            username = %event.username(),
            insertion_id = %insertion_id,
            "event stored in dead letters"
        );
        Ok(())
    }
}

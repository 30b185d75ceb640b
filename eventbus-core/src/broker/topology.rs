use bon::Builder;
use std::collections::BTreeMap;

pub const EMPTY_ROUTING_KEY: &str = "";

/// 队列参数：被拒绝（不重新入队）的消息转投到该交换机
pub const DEAD_LETTER_EXCHANGE_ARGUMENT: &str = "x-dead-letter-exchange";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeType {
    /// 按路由键精确匹配
    #[default]
    Direct,
    /// 忽略路由键，投递到所有绑定队列
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ExchangeSpecification {
    #[builder(into)]
    pub name: String,
    #[builder(default)]
    pub exchange_type: ExchangeType,
    #[builder(default)]
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct QueueSpecification {
    #[builder(into)]
    pub name: String,
    #[builder(default)]
    pub durable: bool,
    #[builder(default)]
    pub exclusive: bool,
    #[builder(default)]
    pub auto_delete: bool,
    #[builder(default)]
    pub arguments: BTreeMap<String, String>,
}

impl QueueSpecification {
    /// 死信交换机参数（若有）
    pub fn dead_letter_exchange(&self) -> Option<&str> {
        self.arguments
            .get(DEAD_LETTER_EXCHANGE_ARGUMENT)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Builder)]
pub struct BindingSpecification {
    #[builder(into)]
    pub exchange: String,
    #[builder(into)]
    pub queue: String,
    #[builder(into, default = EMPTY_ROUTING_KEY.to_string())]
    pub routing_key: String,
}

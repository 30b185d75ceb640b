//! 事件编解码（EventSerializer）
//!
//! 总线只把事件当作不透明载荷：发布前编码一次，消费时解码。
//! 解码失败属于单条投递的硬错误，由消费方决定如何处置（见 `GroupRegistration`）。
//!
use crate::error::EventBusResult as Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// 事件编解码器
pub trait EventSerializer<E>: Send + Sync {
    fn to_json(&self, event: &E) -> Result<String>;

    fn as_event(&self, json: &str) -> Result<E>;

    /// 从原始字节解码（要求 UTF-8）
    fn from_bytes(&self, bytes: &[u8]) -> Result<E> {
        let json = std::str::from_utf8(bytes)?;
        self.as_event(json)
    }
}

/// 基于 serde_json 的默认实现
pub struct JsonEventSerializer<E> {
    _marker: PhantomData<fn() -> E>,
}

impl<E> JsonEventSerializer<E> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<E> Default for JsonEventSerializer<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventSerializer<E> for JsonEventSerializer<E>
where
    E: Serialize + DeserializeOwned,
{
    fn to_json(&self, event: &E) -> Result<String> {
        Ok(serde_json::to_string(event)?)
    }

    fn as_event(&self, json: &str) -> Result<E> {
        Ok(serde_json::from_str(json)?)
    }
}

//! 事件总线过程宏（eventbus-macros）
//!
//! `#[event]`：为事件枚举实现 `::eventbus_core::event::Event`。
//!
use proc_macro::TokenStream;

mod event;
mod utils;

/// 仅支持形如：
/// pub enum MailboxEvent {
///     Variant { field_a: T, ... },
/// }
/// 的具名字段变体，并为每个变体追加 `event_id: EventId`、`username: Username` 两个字段（若缺失）。
/// - 默认派生 `Debug, Clone, serde::Serialize, serde::Deserialize`（与已有 derive 合并去重）
/// - 事件类型默认为变体名，变体可通过 `#[event(event_type = "...")]` 覆写
/// - `#[event(noop = true)]` 标记空操作变体，总线不会分发此类事件
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}

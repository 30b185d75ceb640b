//! 事件总线运行时（eventing）
//!
//! - `EventDispatcher`：本地同步监听器执行 + 远端组广播与 key 分发；
//! - `GroupRegistration` / `GroupRegistrationHandler`：分布式组监听，竞争消费、重试与死信；
//! - `KeyRegistrationHandler`：本节点 key 队列与 key 监听器的绑定管理；
//! - `EventBus`：组合以上组件的门面。
//!
//! 只依赖 `broker` 中的窄接口，可对接任意消息中间件或内存实现。
//!
mod bus;
mod dispatcher;
mod group_registration;
mod group_registration_handler;
mod key_registration_handler;

pub use bus::EventBus;
pub use dispatcher::{EVENT_BUS_ID_HEADER, EventDispatcher};
pub use group_registration::{GroupRegistration, RegistrationState};
pub use group_registration_handler::GroupRegistrationHandler;
pub use key_registration_handler::{KeyRegistration, KeyRegistrationHandler};

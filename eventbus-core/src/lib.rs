//! 分布式事件总线核心库（eventbus-core）
//!
//! 任意节点发布的领域事件（邮箱变更、配额更新等）经 broker 可靠地投递给已注册的监听器：
//! - 本地 key 监听器：按 `RegistrationKey`（邮箱/用户）订阅，同步监听器在分发时直接执行；
//! - 分布式组监听器：同名组跨节点共享持久工作队列，竞争消费，失败按退避重试，
//!   重试耗尽后写入死信，可显式重投递。
//!
//! 模块划分：
//! - `event`：事件接口、标识与编解码；
//! - `registration`：组、注册键、路由键与拓扑命名；
//! - `listener`：监听器协议、执行器与本地监听器表；
//! - `retry`：退避等待与组消费重试；
//! - `dead_letters`：死信存储；
//! - `broker`：消息中间件窄接口与内存实现；
//! - `eventing`：分发器、组/key 注册与 `EventBus` 门面；
//! - `config`：配置与环境变量加载。
//!
//! 典型用法：
//! 1. 用 `#[event]` 定义事件枚举；
//! 2. 以 `EventBus::builder()` 组装 broker、编解码器与死信存储并 `start`；
//! 3. `register_group` / `register_key` 注册监听器，`dispatch` 发布事件。
//!
pub mod broker;
pub mod config;
pub mod dead_letters;
pub mod error;
pub mod event;
pub mod eventing;
pub mod listener;
pub mod registration;
pub mod retry;

// 允许在本 crate 内部通过 ::eventbus_core 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::eventbus_core 路径。
extern crate self as eventbus_core;

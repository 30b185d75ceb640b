/// 运维调用上下文
///
/// 承载一次运维命令的横切信息，只用于日志与审计，不参与路由：
/// ```rust
/// use eventbus_admin::context::AdminContext;
///
/// let ctx = AdminContext::new()
///     .with_actor("ops-1")
///     .with_correlation_id("cor-123");
/// assert_eq!(ctx.actor.as_deref(), Some("ops-1"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct AdminContext {
    /// 发起者（运维人员或自动化任务）
    pub actor: Option<String>,
    /// 链路追踪 ID
    pub correlation_id: Option<String>,
}

impl AdminContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

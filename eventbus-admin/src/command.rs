/// 运维命令（Command）
///
/// 表达一次运维意图，例如“重投递某个组的死信”。
/// - `NAME`：命令的稳定名称，用于日志与路由错误信息，避免依赖 `type_name::<T>()`；
/// - `Output`：执行结果，由对应的处理器产生。
pub trait Command: Send + Sync + 'static {
    const NAME: &'static str;

    type Output: Send + 'static;
}

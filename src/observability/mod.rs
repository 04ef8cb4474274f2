//! 可观测性：tracing 订阅器
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=beehive=debug` 查看 prompt）。
//! 派发审计日志以 `audit` 字段输出一行 JSON，可按 `event = "dispatch_audit"` 过滤。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；重复调用时忽略（测试中多次初始化）
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

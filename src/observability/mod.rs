//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，可用 RUST_LOG 覆盖；重复初始化时静默忽略（测试里多次调用无害）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// 机器可读的 JSON 日志
pub fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().flatten_event(true))
        .try_init();
}

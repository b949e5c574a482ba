//! 可观测性：tracing 日志初始化
//!
//! 默认 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=agentic_rag=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 日志写 stderr，stdout 只输出 JSON 结果
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

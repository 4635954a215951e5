//! 进程级日志订阅器安装。

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// 安装 `fmt + EnvFilter` 全局订阅器，可重复调用。
///
/// - 过滤规则读取 `RUST_LOG`，缺省为 `info`；
/// - 返回值表示本次（或首次）调用是否真正完成了安装：外部已经设置了全局订阅器时为 `false`，
///   此时日志沿用外部订阅器。
pub fn init_tracing() -> bool {
    *INSTALLED.get_or_init(|| {
        tracing_subscriber::registry()
            .with(build_env_filter())
            .with(tracing_subscriber::fmt::layer().with_thread_names(true))
            .try_init()
            .is_ok()
    })
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}


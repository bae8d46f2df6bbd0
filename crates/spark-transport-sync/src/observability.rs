//! 日志接入。
//!
//! 库本身只通过 `tracing` 宏发出事件（目标为 `spark_transport_sync`，每条事件携带 `conn` 字段），
//! 不主动安装订阅者；二进制或测试入口可调用 [`install_fmt_subscriber`] 获得开箱即用的终端输出。

use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 本 crate 事件使用的 `tracing` 目标。
pub const TRACING_TARGET: &str = "spark_transport_sync";

/// 安装订阅者时可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// 进程中已存在全局订阅者。
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
    /// 设置全局订阅者失败。
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 订阅者；过滤规则取自 `RUST_LOG`，缺省为 `info`。
///
/// # Errors
///
/// 已存在全局订阅者时返回 [`InstallError::SubscriberAlreadySet`]，不会覆盖调用方的配置。
pub fn install_fmt_subscriber() -> Result<(), InstallError> {
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_emitted_under_the_crate_target() {
        assert!(module_path!().starts_with(TRACING_TARGET));
    }
}

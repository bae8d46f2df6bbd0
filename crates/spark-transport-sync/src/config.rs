//! 连接配置与构造器。
//!
//! ## 意图（Why）
//! - 宿主通常从 TOML 配置文件中批量设定连接参数（日志标签、缓冲初始容量、定时线程名），
//!   这里提供可反序列化的 [`ConnConfig`] 与链式 [`ConnBuilder`]。
//!
//! ## 契约（What）
//! - 缺省字段取默认值；`label` 不得为空，`inbound_capacity` 不得为零；
//! - 未显式注入定时服务时使用进程级 [`TimerService::global`]。

use std::io;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::conn::Conn;
use crate::engine::EngineSocket;
use crate::timer::TimerService;

const DEFAULT_LABEL: &str = "conn";
const DEFAULT_INBOUND_CAPACITY: usize = 64 * 1024;
const DEFAULT_TIMER_THREAD: &str = "spark-sync-timer";

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML 语法或字段类型错误。
    #[error("invalid connection config: {0}")]
    Parse(#[from] toml::de::Error),

    /// 字段取值不合法。
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    /// 无法启动专用定时线程。
    #[error("failed to start timer service: {0}")]
    Timer(#[from] io::Error),
}

/// 单条连接的可配置参数。
///
/// ```toml
/// label = "tracker-peer"
/// inbound_capacity = 131072
/// timer_thread_name = "peer-timers"
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnConfig {
    /// 日志中的连接标签。
    pub label: String,
    /// 入站缓冲初始容量（字节）。
    pub inbound_capacity: usize,
    /// 通过 [`ConnConfig::timer_service`] 启动专用定时服务时使用的线程名。
    pub timer_thread_name: String,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_owned(),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            timer_thread_name: DEFAULT_TIMER_THREAD.to_owned(),
        }
    }
}

impl ConnConfig {
    /// 从 TOML 文本解析并校验。
    ///
    /// # Errors
    ///
    /// 语法错误、未知字段或取值不合法时返回 [`ConfigError`]。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ConnConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段取值。
    ///
    /// # Errors
    ///
    /// 标签为空、容量为零或线程名为空时返回 [`ConfigError::Invalid`]。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "label",
                reason: "must not be empty",
            });
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "inbound_capacity",
                reason: "must be greater than zero",
            });
        }
        if self.timer_thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "timer_thread_name",
                reason: "must not be empty",
            });
        }
        Ok(())
    }

    /// 按 `timer_thread_name` 启动一个专用定时服务，供一组连接共享。
    ///
    /// # Errors
    ///
    /// 线程创建失败时返回 [`ConfigError::Timer`]。
    pub fn timer_service(&self) -> Result<Arc<TimerService>, ConfigError> {
        Ok(Arc::new(TimerService::with_thread_name(
            self.timer_thread_name.clone(),
        )?))
    }
}

/// [`Conn`] 的链式构造器。
#[derive(Debug)]
pub struct ConnBuilder<E> {
    engine: E,
    config: ConnConfig,
    timers: Option<Arc<TimerService>>,
}

impl<E: EngineSocket> ConnBuilder<E> {
    /// 以默认配置包装引擎句柄。
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            config: ConnConfig::default(),
            timers: None,
        }
    }

    /// 整体替换配置。
    pub fn config(mut self, config: ConnConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置日志标签。
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    /// 设置入站缓冲初始容量。
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.config.inbound_capacity = capacity;
        self
    }

    /// 注入定时服务，替代进程级默认实例。
    pub fn timer_service(mut self, timers: Arc<TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// 构造连接。
    ///
    /// # Panics
    ///
    /// 未注入定时服务且进程级定时线程无法创建时 panic；见 [`ConnBuilder::try_build`]。
    pub fn build(mut self) -> Conn<E> {
        let timers = self.timers.take().unwrap_or_else(TimerService::global);
        self.open(timers)
    }

    /// 构造连接，进程级定时线程创建失败时返回错误而非 panic。
    ///
    /// # Errors
    ///
    /// 未注入定时服务且后台线程无法创建时返回 [`ConfigError::Timer`]。
    pub fn try_build(mut self) -> Result<Conn<E>, ConfigError> {
        let timers = match self.timers.take() {
            Some(timers) => timers,
            None => TimerService::try_global()?,
        };
        Ok(self.open(timers))
    }

    fn open(self, timers: Arc<TimerService>) -> Conn<E> {
        Conn::open(
            self.engine,
            Arc::from(self.config.label),
            self.config.inbound_capacity,
            timers,
        )
    }
}

#[cfg(all(test, not(any(loom, spark_loom))))]
mod tests {
    use super::*;
    use crate::testing::MockEngine;
    use std::time::{Duration, Instant};

    #[test]
    fn empty_document_yields_defaults() {
        let config = ConnConfig::from_toml_str("").expect("空文档使用默认值");
        assert_eq!(config, ConnConfig::default());
    }

    #[test]
    fn fields_are_read_from_toml() {
        let config = ConnConfig::from_toml_str(
            r#"
            label = "tracker-peer"
            inbound_capacity = 4096
            "#,
        )
        .expect("合法配置");
        assert_eq!(config.label, "tracker-peer");
        assert_eq!(config.inbound_capacity, 4096);
        assert_eq!(config.timer_thread_name, DEFAULT_TIMER_THREAD);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = ConnConfig::from_toml_str("inbound_capacity = 0").expect_err("零容量");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "inbound_capacity",
                ..
            }
        ));

        let err = ConnConfig::from_toml_str("label = \"  \"").expect_err("空标签");
        assert!(matches!(err, ConfigError::Invalid { field: "label", .. }));

        let err = ConnConfig::from_toml_str("bogus = 1").expect_err("未知字段");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builder_applies_config_and_timer_service() {
        let config = ConnConfig {
            label: "from-config".to_owned(),
            timer_thread_name: "cfg-timers".to_owned(),
            ..ConnConfig::default()
        };
        let timers = config.timer_service().expect("spawn timer thread");
        let conn = ConnBuilder::new(MockEngine::new())
            .config(config)
            .inbound_capacity(8)
            .timer_service(timers)
            .build();
        assert_eq!(conn.label(), "from-config");
    }

    #[test]
    fn try_build_uses_the_injected_or_shared_timer_service() {
        let timers = Arc::new(
            TimerService::with_thread_name("try-build-timers").expect("spawn timer thread"),
        );
        let conn = ConnBuilder::new(MockEngine::new())
            .label("try-injected")
            .timer_service(Arc::clone(&timers))
            .try_build()
            .expect("注入定时服务时构造不会失败");
        conn.set_read_deadline(Some(Instant::now() + Duration::from_secs(60)));
        assert_eq!(timers.pending(), 1, "截止时间登记在注入的服务上");
        drop(conn);
        assert_eq!(timers.pending(), 0);

        let conn = ConnBuilder::new(MockEngine::new())
            .label("try-shared")
            .try_build()
            .expect("进程级定时线程可创建");
        assert_eq!(conn.label(), "try-shared");
        assert!(Arc::ptr_eq(
            &TimerService::try_global().expect("进程级实例已就绪"),
            &TimerService::global()
        ));
    }
}

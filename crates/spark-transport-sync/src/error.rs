//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义同步连接对调用方暴露的全部失败形态：对端结束、引擎错误、引擎销毁、本地关闭与截止超时；
//! - 为每类错误提供稳定错误码，便于日志检索与告警聚合。
//!
//! ## 设计要求（What）
//! - [`ConnError`] 派生 `thiserror::Error`，并且 `Clone + Eq`：同一个锁存错误会被后续每次读写重复返回；
//! - 多个终止条件同时成立时，只通过 [`ConnError::select_for_read`]/[`ConnError::select_for_write`]
//!   按固定优先级挑选一个；
//! - 通过 [`ConnError::io_kind`] 与 `From<ConnError> for io::Error` 接入标准库 IO 生态。

use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

const EOF_CODE: &str = "spark.transport.sync.eof";
const ENGINE_CODE: &str = "spark.transport.sync.engine_error";
const DESTROYED_CODE: &str = "spark.transport.sync.destroyed";
const CLOSED_CODE: &str = "spark.transport.sync.closed";
const DEADLINE_CODE: &str = "spark.transport.sync.deadline_exceeded";

/// 引擎通过错误回调上报的错误码。
///
/// # 教案式说明
/// - **意图 (Why)**：引擎只给出一个符号化的错误名（如 `ECONNRESET`），连接需要把它锁存并在整个生命周期内
///   反复返回，因此使用 `Arc<str>` 保证克隆开销恒定；
/// - **契约 (What)**：相等性按字符串比较；三个常量覆盖引擎已知的错误名，其余字符串原样保留；
/// - **注意事项 (Trade-offs)**：未识别的错误名在 [`EngineErrorCode::io_kind`] 中统一映射为 `Other`。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EngineErrorCode(Arc<str>);

impl EngineErrorCode {
    /// 对端拒绝连接。
    pub const CONNECTION_REFUSED: &'static str = "ECONNREFUSED";
    /// 连接被对端重置。
    pub const CONNECTION_RESET: &'static str = "ECONNRESET";
    /// 引擎判定连接超时。
    pub const TIMED_OUT: &'static str = "ETIMEDOUT";

    /// 以任意错误名构造错误码。
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(Arc::from(code.as_ref()))
    }

    /// 返回错误名原文。
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 将引擎错误名映射到最接近的标准库错误种类。
    pub fn io_kind(&self) -> io::ErrorKind {
        match self.as_str() {
            Self::CONNECTION_RESET => io::ErrorKind::ConnectionReset,
            Self::CONNECTION_REFUSED => io::ErrorKind::ConnectionRefused,
            Self::TIMED_OUT => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        }
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EngineErrorCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EngineErrorCode {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// 同步连接的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把五类异步信号与本地动作折叠成调用方可直接匹配的有限集合；
/// - **契约 (What)**：
///   - `EndOfStream`：对端已结束发送且入站缓冲已读空；
///   - `Engine`：引擎上报的锁存错误，每条连接至多一次，之后永久返回；
///   - `Destroyed`：引擎已销毁底层套接字；
///   - `Closed`：本地调用过 `close`；
///   - `DeadlineExceeded`：读/写截止时间已过，唯一一个可能随截止时间重置而消失的错误；
/// - **执行 (How)**：读路径优先级为 `EndOfStream > Engine > Destroyed > Closed > DeadlineExceeded`，
///   写路径去掉 `EndOfStream`，其余顺序一致。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnError {
    /// 对端结束发送，缓冲已读空。
    #[error("end of stream")]
    EndOfStream,

    /// 引擎上报的锁存错误。
    #[error("engine error: {0}")]
    Engine(EngineErrorCode),

    /// 引擎已销毁套接字。
    #[error("connection destroyed by engine")]
    Destroyed,

    /// 本地已关闭连接。
    #[error("connection closed")]
    Closed,

    /// 读或写截止时间已过。
    #[error("i/o deadline exceeded")]
    DeadlineExceeded,
}

/// 错误优先级判定所需的状态快照。
///
/// 由 `state` 模块在持锁期间填充，本模块只负责排序，不关心字段来源。
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TerminalFlags<'a> {
    pub eof_drained: bool,
    pub engine: Option<&'a EngineErrorCode>,
    pub destroyed: bool,
    pub closed: bool,
    pub deadline_passed: bool,
}

impl ConnError {
    /// 返回稳定错误码，格式与 `spark.transport.*` 系列保持一致。
    pub fn code(&self) -> &'static str {
        match self {
            ConnError::EndOfStream => EOF_CODE,
            ConnError::Engine(_) => ENGINE_CODE,
            ConnError::Destroyed => DESTROYED_CODE,
            ConnError::Closed => CLOSED_CODE,
            ConnError::DeadlineExceeded => DEADLINE_CODE,
        }
    }

    /// 是否为截止超时；调用方可在重设截止时间后重试。
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnError::DeadlineExceeded)
    }

    /// 是否为终止态错误，一旦出现后续同方向操作都会得到相同或更高优先级的错误。
    pub fn is_terminal(&self) -> bool {
        !self.is_timeout()
    }

    /// 映射为标准库错误种类。
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            ConnError::EndOfStream => io::ErrorKind::UnexpectedEof,
            ConnError::Engine(code) => code.io_kind(),
            ConnError::Destroyed => io::ErrorKind::ConnectionAborted,
            ConnError::Closed => io::ErrorKind::NotConnected,
            ConnError::DeadlineExceeded => io::ErrorKind::TimedOut,
        }
    }

    /// 读路径的错误挑选：`EndOfStream` 仅在缓冲读空后才参与比较。
    pub(crate) fn select_for_read(flags: TerminalFlags<'_>) -> Option<ConnError> {
        if flags.eof_drained {
            return Some(ConnError::EndOfStream);
        }
        Self::select_for_write(flags)
    }

    /// 写路径的错误挑选，不关心 EOF。
    pub(crate) fn select_for_write(flags: TerminalFlags<'_>) -> Option<ConnError> {
        if let Some(code) = flags.engine {
            return Some(ConnError::Engine(code.clone()));
        }
        if flags.destroyed {
            return Some(ConnError::Destroyed);
        }
        if flags.closed {
            return Some(ConnError::Closed);
        }
        if flags.deadline_passed {
            return Some(ConnError::DeadlineExceeded);
        }
        None
    }
}

impl From<ConnError> for io::Error {
    fn from(value: ConnError) -> Self {
        io::Error::new(value.io_kind(), value)
    }
}

#![doc = r#"
# spark-transport-sync

## 设计动机（Why）
- **定位**：把只通过回调报告事件的外部传输引擎（例如 uTP 之类的用户态可靠传输）
  适配成多线程可用的阻塞式字节流连接，使上层协议代码可以像使用 `TcpStream` 一样
  调用 `read`/`write`/`close`。
- **架构角色**：位于引擎绑定层与应用协议之间；引擎绑定层持有 [`ConnNotifier`]
  转发回调，应用持有 [`Conn`]。
- **设计理念**：单锁监视器。所有状态修改与等待都经过同一把互斥锁和同一个条件变量，
  等待者醒来后整轮重新检查谓词。

## 核心契约（What）
- **输入条件**：引擎句柄实现 [`EngineSocket`]，其原语只在连接锁内被调用；
- **输出保障**：读写返回 [`Transfer`]（字节数 + 可选错误），错误按固定优先级挑选，
  并可通过 `std::io::{Read, Write}` 以标准 IO 语义使用；
- **前置约束**：引擎每条连接至多报告一次错误，违反时 [`ConnNotifier::on_error`] panic。

## 实现策略（How）
- **状态**：内部状态机维护入站缓冲、生命周期标志、截止时间与引擎句柄槽位；
- **等待**：[`Conn`] 在条件变量上等待，引擎回调与截止定时器负责广播；
- **截止**：进程级 [`TimerService`] 以单个后台线程驱动最小堆，到期只唤醒，不改状态。

## 风险与考量（Trade-offs）
- 同一连接上的多个读者或写者之间不保证公平；
- 截止时间基于单调时钟 [`std::time::Instant`]，不随系统时间调整。
"#]
#![deny(unsafe_code)]

pub mod config;
mod conn;
mod engine;
mod error;
mod notify;
pub mod observability;
mod state;
mod sync;
pub mod testing;
mod timer;

pub use config::{ConfigError, ConnBuilder, ConnConfig};
pub use conn::{Conn, Transfer};
pub use engine::EngineSocket;
pub use error::{ConnError, EngineErrorCode};
pub use notify::ConnNotifier;
pub use state::{ConnPhase, ConnStats};
pub use timer::TimerService;

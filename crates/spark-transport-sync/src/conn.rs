use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use tracing::{debug, trace};

use crate::engine::EngineSocket;
use crate::error::ConnError;
use crate::notify::ConnNotifier;
use crate::state::{ConnPhase, ConnStats, ConnectionState};
use crate::sync::{Condvar, Mutex, MutexGuard};
use crate::timer::{DeadlineTimer, FireFn, TimerService};

/// 一次阻塞读写的结果：已搬运的字节数，以及导致调用返回的错误（若有）。
///
/// 字节数与错误可以同时存在，例如读到最后一段数据的同时得知对端已结束，
/// 或写入部分字节后连接被重置。
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Transfer {
    /// 本次调用搬运的字节数。
    pub bytes: usize,
    /// 按优先级挑选出的错误。
    pub error: Option<ConnError>,
}

impl Transfer {
    /// 转为 `Result`：有错误时丢弃字节数。
    ///
    /// # Errors
    ///
    /// `error` 字段非空时原样返回。
    pub fn into_result(self) -> Result<usize, ConnError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.bytes),
        }
    }

    /// 是否以错误结束。
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

pub(crate) struct Inner<E> {
    pub(crate) state: ConnectionState<E>,
    read_timer: DeadlineTimer,
    write_timer: DeadlineTimer,
}

/// 连接锁与条件变量组成的监视器，应用线程、引擎回调与定时器共用。
pub(crate) struct Shared<E> {
    inner: Mutex<Inner<E>>,
    cond: Condvar,
    pub(crate) label: Arc<str>,
}

impl<E: EngineSocket> Shared<E> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<E>> {
        self.inner.lock()
    }

    /// 释放锁并等待广播，返回重新获得的守卫；调用方醒来后必须整轮重查谓词。
    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Inner<E>>) -> MutexGuard<'a, Inner<E>> {
        self.cond.wait(guard)
    }

    /// 在持锁状态下唤醒全部等待者；调用方负责先完成状态修改。
    pub(crate) fn broadcast(&self) {
        self.cond.notify_all();
    }
}

fn wake_on_fire<E: EngineSocket>(weak: Weak<Shared<E>>) -> FireFn {
    Arc::new(move || {
        if let Some(shared) = weak.upgrade() {
            let _guard = shared.lock();
            shared.broadcast();
        }
    })
}

/// 把回调驱动的引擎连接包装成多线程可用的阻塞式字节流。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 引擎只在自己的执行上下文中通过回调报告“已连接/数据到达/对端结束/出错/已销毁”；
///   应用线程则希望像使用 `TcpStream` 一样调用阻塞的 `read`/`write`；
/// - 本类型是两者之间唯一的会合点：所有状态修改与等待都经过同一把锁和同一个条件变量。
///
/// ## 逻辑 (How)
/// - `read`/`write` 在持锁状态下做一次非阻塞尝试，无进展且无错误时在条件变量上等待，醒来后整轮重试；
/// - 引擎回调（见 [`ConnNotifier`]）与截止定时器修改状态后广播；
/// - 截止时间只在谓词检查中生效，定时器到期仅负责唤醒。
///
/// ## 契约 (What)
/// - 全部方法接受 `&self`，可通过 `Arc<Conn<E>>` 在线程间共享；
/// - 同一连接上的多个读者或写者之间不保证公平或顺序；
/// - 丢弃 `Conn` 等价于调用 [`Conn::close`]；此后通过 [`ConnNotifier`] 到达的回调仍被接受并记录。
///
/// ## 注意事项 (Trade-offs)
/// - 引擎原语只在持锁时调用，引擎内部无需额外同步；
/// - 引擎在一条连接上报告两次错误属于契约破坏，会以 panic 终止（见 [`ConnNotifier::on_error`]）。
pub struct Conn<E: EngineSocket> {
    shared: Arc<Shared<E>>,
}

impl<E: EngineSocket> fmt::Debug for Conn<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("label", &self.shared.label)
            .field("phase", &self.phase())
            .finish()
    }
}

impl<E: EngineSocket> Conn<E> {
    /// 使用默认配置与进程级定时服务包装引擎句柄。
    ///
    /// # Panics
    ///
    /// 进程级定时线程无法创建时 panic；可失败的构造见 [`crate::ConnBuilder::try_build`]。
    pub fn new(engine: E) -> Self {
        crate::config::ConnBuilder::new(engine).build()
    }

    pub(crate) fn open(
        engine: E,
        label: Arc<str>,
        inbound_capacity: usize,
        timers: Arc<TimerService>,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<E>>| {
            let fire = wake_on_fire(weak.clone());
            Shared {
                inner: Mutex::new(Inner {
                    state: ConnectionState::new(engine, inbound_capacity),
                    read_timer: DeadlineTimer::new(Arc::clone(&timers), Arc::clone(&fire)),
                    write_timer: DeadlineTimer::new(timers, fire),
                }),
                cond: Condvar::new(),
                label,
            }
        });
        debug!(conn = %shared.label, "connection opened");
        Self { shared }
    }

    /// 返回引擎回调入口，供引擎绑定层在各个回调中调用。
    pub fn notifier(&self) -> ConnNotifier<E> {
        ConnNotifier::new(Arc::clone(&self.shared))
    }

    /// 日志中使用的连接标签。
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// 阻塞直到收到建连通知或连接进入终止态。
    ///
    /// 本原语没有超时；需要超时的调用方可以在另一线程上关闭连接。
    ///
    /// # Errors
    ///
    /// 依次检查：锁存的引擎错误、`Destroyed`、`Closed`。已建连后的销毁或关闭不影响返回 `Ok`。
    pub fn wait_for_connect(&self) -> Result<(), ConnError> {
        let mut inner = self.shared.lock();
        loop {
            if let Some(code) = inner.state.latched() {
                return Err(ConnError::Engine(code.clone()));
            }
            if inner.state.is_connected() {
                return Ok(());
            }
            match inner.state.phase() {
                ConnPhase::Destroyed => return Err(ConnError::Destroyed),
                ConnPhase::Closed => return Err(ConnError::Closed),
                _ => inner = self.shared.wait(inner),
            }
        }
    }

    /// 读取已到达的数据，缓冲为空时阻塞。
    ///
    /// - 先从入站缓冲搬运尽可能多的字节；读空缓冲时向引擎发出流控提示；
    /// - 错误按 `EndOfStream > Engine > Destroyed > Closed > DeadlineExceeded` 挑选，
    ///   `EndOfStream` 仅在缓冲读空后出现；
    /// - 零字节、无错误且 `buf` 非空时等待唤醒后重试；`buf` 为空时立即返回。
    pub fn read(&self, buf: &mut [u8]) -> Transfer {
        let mut inner = self.shared.lock();
        loop {
            let (n, error) = inner.state.read_no_wait(buf, Instant::now());
            inner.state.record_read(n);
            if n != 0 || buf.is_empty() || error.is_some() {
                trace!(
                    conn = %self.shared.label,
                    bytes = n,
                    total = inner.state.stats().bytes_read,
                    error = ?error,
                    "read"
                );
                return Transfer { bytes: n, error };
            }
            inner = self.shared.wait(inner);
        }
    }

    /// 把 `buf` 全部交给引擎，背压时阻塞。
    ///
    /// - 每轮先检查 `Engine > Destroyed > Closed > DeadlineExceeded`，命中即返回已写字节数与该错误；
    /// - 引擎接收到字节后立即继续尝试，接收 0 字节时等待唤醒；
    /// - 空缓冲只做一次终止条件检查。
    pub fn write(&self, buf: &[u8]) -> Transfer {
        let mut inner = self.shared.lock();
        let mut remaining = buf;
        let mut written = 0usize;
        let mut error = None;

        if remaining.is_empty() {
            error = inner.state.write_error(Instant::now());
        }
        while !remaining.is_empty() {
            let (n, err) = inner.state.write_no_wait(remaining, Instant::now());
            remaining = &remaining[n..];
            written += n;
            if err.is_some() {
                error = err;
                break;
            }
            if n != 0 {
                continue;
            }
            inner = self.shared.wait(inner);
        }

        inner.state.record_written(written);
        trace!(
            conn = %self.shared.label,
            bytes = written,
            total = inner.state.stats().bytes_written,
            error = ?error,
            "write"
        );
        Transfer {
            bytes: written,
            error,
        }
    }

    /// 关闭连接，可重复调用。
    ///
    /// 首次调用时若引擎尚未销毁则请求引擎关闭并丢弃句柄，随后取消截止定时器并唤醒全部等待者。
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if !inner.state.close() {
            return;
        }
        inner.read_timer.disarm();
        inner.write_timer.disarm();
        debug!(conn = %self.shared.label, "connection closed");
        self.shared.broadcast();
    }

    /// 同时设置读写截止时间，`None` 表示不限时。
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        let mut inner = self.shared.lock();
        inner.state.set_read_deadline(deadline);
        inner.state.set_write_deadline(deadline);
        inner.read_timer.reset(deadline);
        inner.write_timer.reset(deadline);
        debug!(conn = %self.shared.label, ?deadline, "read/write deadline updated");
        self.shared.broadcast();
    }

    /// 设置读截止时间，`None` 表示不限时。
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        let mut inner = self.shared.lock();
        inner.state.set_read_deadline(deadline);
        inner.read_timer.reset(deadline);
        debug!(conn = %self.shared.label, ?deadline, "read deadline updated");
        self.shared.broadcast();
    }

    /// 设置写截止时间，`None` 表示不限时。
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        let mut inner = self.shared.lock();
        inner.state.set_write_deadline(deadline);
        inner.write_timer.reset(deadline);
        debug!(conn = %self.shared.label, ?deadline, "write deadline updated");
        self.shared.broadcast();
    }

    /// 引擎数据报套接字的本地地址；句柄失效后返回最后一次观测值。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().state.local_addr()
    }

    /// 对端地址；句柄失效后返回最后一次观测值。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().state.peer_addr()
    }

    /// 累计收发字节数。
    pub fn stats(&self) -> ConnStats {
        self.shared.lock().state.stats()
    }

    /// 当前生命周期阶段的诊断快照。
    pub fn phase(&self) -> ConnPhase {
        self.shared.lock().state.phase()
    }

    /// 入站缓冲中尚未被读取的字节数。
    pub fn buffered(&self) -> usize {
        self.shared.lock().state.inbound_len()
    }
}

impl<E: EngineSocket> Drop for Conn<E> {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_into_io(transfer: Transfer) -> io::Result<usize> {
    match transfer {
        Transfer { bytes, .. } if bytes != 0 => Ok(bytes),
        Transfer {
            error: None | Some(ConnError::EndOfStream),
            ..
        } => Ok(0),
        Transfer {
            error: Some(err), ..
        } => Err(err.into()),
    }
}

fn write_into_io(transfer: Transfer) -> io::Result<usize> {
    match transfer {
        Transfer { bytes, .. } if bytes != 0 => Ok(bytes),
        Transfer {
            error: Some(err), ..
        } => Err(err.into()),
        Transfer { error: None, .. } => Ok(0),
    }
}

impl<E: EngineSocket> io::Read for &Conn<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_into_io(Conn::read(self, buf))
    }
}

impl<E: EngineSocket> io::Read for Conn<E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_into_io(Conn::read(self, buf))
    }
}

impl<E: EngineSocket> io::Write for &Conn<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_into_io(Conn::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<E: EngineSocket> io::Write for Conn<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_into_io(Conn::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

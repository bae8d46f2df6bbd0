//! 单条连接的可变状态，全部字段只在持有连接锁时读写。
//!
//! 本模块不做任何同步，只负责“给定当前状态，一次非阻塞尝试的结果是什么”；
//! 等待、唤醒与计时器由 `conn`/`notify`/`timer` 在外层组合。

use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Buf, BytesMut};

use crate::engine::{EngineSlot, EngineSocket};
use crate::error::{ConnError, EngineErrorCode, TerminalFlags};

/// 连接生命周期的诊断快照。
///
/// 各标志位可以同时成立，这里按 `Errored > Destroyed > Closed > EofPending > Connected > Connecting`
/// 取最靠前的一个，仅用于日志与监控，不参与读写判定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnPhase {
    /// 尚未收到建连通知。
    Connecting,
    /// 已建连，可读写。
    Connected,
    /// 对端已结束发送，缓冲中可能仍有未读数据。
    EofPending,
    /// 已锁存引擎错误。
    Errored,
    /// 引擎已销毁套接字。
    Destroyed,
    /// 本地已关闭。
    Closed,
}

impl ConnPhase {
    /// 是否已进入不可恢复的终止态。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnPhase::Errored | ConnPhase::Destroyed | ConnPhase::Closed
        )
    }
}

/// 连接的累计收发字节数，只增不减。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnStats {
    /// `read` 累计交付给调用方的字节数。
    pub bytes_read: u64,
    /// `write` 累计被引擎接收的字节数。
    pub bytes_written: u64,
}

/// 一次非阻塞尝试的结果：本轮搬运的字节数与按优先级挑出的错误。
pub(crate) type Attempt = (usize, Option<ConnError>);

#[derive(Debug)]
pub(crate) struct ConnectionState<E> {
    engine: EngineSlot<E>,
    inbound: BytesMut,
    connected: bool,
    eof: bool,
    destroyed: bool,
    closed: bool,
    latched: Option<EngineErrorCode>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    stats: ConnStats,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl<E: EngineSocket> ConnectionState<E> {
    pub(crate) fn new(engine: E, inbound_capacity: usize) -> Self {
        let peer_addr = engine.peer_addr();
        let local_addr = engine.local_addr();
        Self {
            engine: EngineSlot::new(engine),
            inbound: BytesMut::with_capacity(inbound_capacity),
            connected: false,
            eof: false,
            destroyed: false,
            closed: false,
            latched: None,
            read_deadline: None,
            write_deadline: None,
            stats: ConnStats::default(),
            peer_addr,
            local_addr,
        }
    }

    /// 从入站缓冲搬运尽可能多的字节，并给出读路径应报告的错误。
    pub(crate) fn read_no_wait(&mut self, buf: &mut [u8], now: Instant) -> Attempt {
        let n = buf.len().min(self.inbound.len());
        if n != 0 {
            buf[..n].copy_from_slice(&self.inbound[..n]);
            self.inbound.advance(n);
            if self.inbound.is_empty() && self.may_signal_engine() {
                if let Some(engine) = self.engine.get_mut() {
                    engine.read_drained();
                }
            }
        }
        let flags = TerminalFlags {
            eof_drained: self.eof && self.inbound.is_empty(),
            deadline_passed: deadline_passed(self.read_deadline, now),
            ..self.terminal_flags()
        };
        (n, ConnError::select_for_read(flags))
    }

    /// 在终止条件均不成立时把 `buf` 交给引擎，返回引擎接收的字节数。
    pub(crate) fn write_no_wait(&mut self, buf: &[u8], now: Instant) -> Attempt {
        if let Some(err) = self.write_error(now) {
            return (0, Some(err));
        }
        if buf.is_empty() {
            return (0, None);
        }
        let Some(engine) = self.engine.get_mut() else {
            return (0, Some(ConnError::Destroyed));
        };
        let accepted = engine.write(buf);
        if accepted > buf.len() {
            tracing::warn!(
                accepted,
                offered = buf.len(),
                "engine accepted more bytes than offered; clamping"
            );
            return (buf.len(), None);
        }
        (accepted, None)
    }

    /// 仅计算写路径的错误，不触碰引擎。
    pub(crate) fn write_error(&self, now: Instant) -> Option<ConnError> {
        let flags = TerminalFlags {
            deadline_passed: deadline_passed(self.write_deadline, now),
            ..self.terminal_flags()
        };
        ConnError::select_for_write(flags)
    }

    fn terminal_flags(&self) -> TerminalFlags<'_> {
        TerminalFlags {
            eof_drained: false,
            engine: self.latched.as_ref(),
            destroyed: self.destroyed,
            closed: self.closed,
            deadline_passed: false,
        }
    }

    /// 引擎句柄仍可用于流控提示的条件：未出错、未销毁、未关闭。
    fn may_signal_engine(&self) -> bool {
        self.latched.is_none() && !self.destroyed && !self.closed && self.engine.is_live()
    }

    pub(crate) fn mark_connected(&mut self) {
        self.connected = true;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn latched(&self) -> Option<&EngineErrorCode> {
        self.latched.as_ref()
    }

    /// 锁存引擎错误；已有错误时返回先前的错误码，交由调用方升级为致命错误。
    pub(crate) fn latch_error(&mut self, code: EngineErrorCode) -> Result<(), EngineErrorCode> {
        match &self.latched {
            Some(existing) => Err(existing.clone()),
            None => {
                self.latched = Some(code);
                Ok(())
            }
        }
    }

    /// 追加入站数据，返回追加前连接是否已处于不应再收数据的状态。
    pub(crate) fn push_inbound(&mut self, data: &[u8]) -> bool {
        let late = self.eof || self.destroyed || self.closed;
        self.inbound.extend_from_slice(data);
        late
    }

    pub(crate) fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub(crate) fn mark_eof(&mut self) {
        self.eof = true;
    }

    /// 引擎已销毁套接字：句柄立即失效，不再调用任何引擎原语。
    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
        self.engine.invalidate();
    }

    /// 本地关闭；返回 `false` 表示此前已关闭。
    ///
    /// 引擎尚未销毁时先请求引擎关闭，再丢弃句柄。
    pub(crate) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if !self.destroyed {
            if let Some(mut engine) = self.engine.take() {
                engine.close();
            }
        }
        self.closed = true;
        true
    }

    pub(crate) fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline = at;
    }

    pub(crate) fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline = at;
    }

    pub(crate) fn record_read(&mut self, n: usize) {
        self.stats.bytes_read = self.stats.bytes_read.saturating_add(n as u64);
    }

    pub(crate) fn record_written(&mut self, n: usize) {
        self.stats.bytes_written = self.stats.bytes_written.saturating_add(n as u64);
    }

    pub(crate) fn stats(&self) -> ConnStats {
        self.stats
    }

    /// 句柄有效时刷新并返回对端地址，否则返回最后一次观测值。
    pub(crate) fn peer_addr(&mut self) -> Option<SocketAddr> {
        if let Some(addr) = self.engine.get().and_then(EngineSocket::peer_addr) {
            self.peer_addr = Some(addr);
        }
        self.peer_addr
    }

    /// 句柄有效时刷新并返回本地地址，否则返回最后一次观测值。
    pub(crate) fn local_addr(&mut self) -> Option<SocketAddr> {
        if let Some(addr) = self.engine.get().and_then(EngineSocket::local_addr) {
            self.local_addr = Some(addr);
        }
        self.local_addr
    }

    pub(crate) fn phase(&self) -> ConnPhase {
        if self.latched.is_some() {
            ConnPhase::Errored
        } else if self.destroyed {
            ConnPhase::Destroyed
        } else if self.closed {
            ConnPhase::Closed
        } else if self.eof {
            ConnPhase::EofPending
        } else if self.connected {
            ConnPhase::Connected
        } else {
            ConnPhase::Connecting
        }
    }
}

fn deadline_passed(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|at| now >= at)
}

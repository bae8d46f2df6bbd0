//! 引擎回调入口（通知汇）。
//!
//! ## 意图（Why）
//! - 引擎在自己的执行上下文中报告连接事件；这里把每个事件翻译成一次“持锁 → 修改状态 → 广播”。
//!
//! ## 契约（What）
//! - 除状态字段本身外没有额外的事件队列，重复事件（例如多次 `on_eof`）天然幂等；
//! - 唯一的致命路径是同一连接收到第二次错误通知。

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::conn::Shared;
use crate::engine::EngineSocket;
use crate::error::EngineErrorCode;

/// 引擎绑定层持有的回调句柄。
///
/// 可克隆、可跨线程；持有连接监视器的强引用，因此应用丢弃 [`crate::Conn`] 之后到达的回调依然会被记录，
/// 此时连接已是只报告错误的空壳。
pub struct ConnNotifier<E: EngineSocket> {
    shared: Arc<Shared<E>>,
}

impl<E: EngineSocket> Clone for ConnNotifier<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: EngineSocket> fmt::Debug for ConnNotifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnNotifier")
            .field("label", &self.shared.label)
            .finish()
    }
}

impl<E: EngineSocket> ConnNotifier<E> {
    pub(crate) fn new(shared: Arc<Shared<E>>) -> Self {
        Self { shared }
    }

    /// 建连完成。
    pub fn on_connected(&self) {
        let mut inner = self.shared.lock();
        inner.state.mark_connected();
        debug!(conn = %self.shared.label, "engine reported connected");
        self.shared.broadcast();
    }

    /// 引擎交付入站数据，按到达顺序追加到缓冲尾部。
    pub fn on_data(&self, data: &[u8]) {
        let mut inner = self.shared.lock();
        if inner.state.push_inbound(data) {
            warn!(
                conn = %self.shared.label,
                bytes = data.len(),
                "engine delivered data after eof, destroy or close"
            );
        }
        trace!(
            conn = %self.shared.label,
            bytes = data.len(),
            buffered = inner.state.inbound_len(),
            "engine delivered data"
        );
        self.shared.broadcast();
    }

    /// 对端结束发送。
    pub fn on_eof(&self) {
        let mut inner = self.shared.lock();
        inner.state.mark_eof();
        debug!(conn = %self.shared.label, "engine reported eof");
        self.shared.broadcast();
    }

    /// 引擎发送队列腾出空间，唤醒因背压等待的写者；不修改任何状态。
    pub fn on_writable(&self) {
        let _inner = self.shared.lock();
        trace!(conn = %self.shared.label, "engine reported writable");
        self.shared.broadcast();
    }

    /// 锁存引擎错误。
    ///
    /// # Panics
    ///
    /// 同一连接已锁存过错误时 panic：引擎契约保证每条连接至多报告一次错误，
    /// 第二次报告意味着引擎与适配层的状态已经不一致。
    pub fn on_error(&self, code: impl Into<EngineErrorCode>) {
        let code = code.into();
        let mut inner = self.shared.lock();
        if let Err(existing) = inner.state.latch_error(code.clone()) {
            drop(inner);
            error!(
                conn = %self.shared.label,
                %code,
                %existing,
                "engine reported a second error"
            );
            panic!(
                "multiple engine errors on connection `{}`: got {code}, have {existing}",
                self.shared.label
            );
        }
        debug!(conn = %self.shared.label, %code, "engine error latched");
        self.shared.broadcast();
    }

    /// 引擎已销毁套接字；句柄随即失效，后续任何操作都不会再触达引擎。
    pub fn on_destroyed(&self) {
        let mut inner = self.shared.lock();
        inner.state.mark_destroyed();
        debug!(conn = %self.shared.label, "engine destroyed socket");
        self.shared.broadcast();
    }
}

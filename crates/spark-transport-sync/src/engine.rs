use std::net::SocketAddr;

/// 回调驱动的传输引擎暴露给适配层的单连接句柄。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 引擎在自己的单线程上下文中实现可靠有序字节流，本 crate 只需要其中五个非阻塞原语即可把它包装成
///   阻塞式连接；
/// - 把句柄抽象为 trait，使同一套阻塞协议可以挂在不同引擎绑定或测试替身之上。
///
/// ## 契约说明（What）
/// - `write`：非阻塞地接收至多 `buf.len()` 字节，返回实际接收数，`0` 表示背压；
/// - `close`：请求优雅关闭，返回后句柄不会再被调用；
/// - `peer_addr`/`local_addr`：仅在句柄仍有效时调用；
/// - `read_drained`：入站缓冲被读空后的流控提示，不支持时保持默认空实现即可；
/// - **前置条件**：所有方法只会在持有连接锁时被调用，实现无需自行加锁；
/// - **后置条件**：引擎发出销毁通知或 `close` 被调用后，句柄被丢弃，不再被解引用。
///
/// ## 风险提示（Trade-offs）
/// - 省略 `read_drained` 不影响正确性，但引擎的接收窗口可能无法及时放开，吞吐下降。
pub trait EngineSocket: Send + 'static {
    /// 将字节交给引擎发送队列，返回接收的字节数。
    fn write(&mut self, buf: &[u8]) -> usize;

    /// 请求关闭底层套接字。
    fn close(&mut self);

    /// 查询对端地址。
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// 查询引擎所用数据报套接字的本地地址。
    fn local_addr(&self) -> Option<SocketAddr>;

    /// 通知引擎入站数据已被全部消费。
    fn read_drained(&mut self) {}
}

/// 独占持有引擎句柄的槽位，显式区分“在用”与“已失效”。
///
/// 销毁通知与本地关闭都通过 [`EngineSlot::invalidate`]/[`EngineSlot::take`] 让槽位进入 `Absent`，
/// 之后所有访问都返回 `None`，不会触达已释放的引擎资源。
#[derive(Debug)]
pub(crate) enum EngineSlot<E> {
    Live(E),
    Absent,
}

impl<E: EngineSocket> EngineSlot<E> {
    pub(crate) fn new(engine: E) -> Self {
        EngineSlot::Live(engine)
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut E> {
        match self {
            EngineSlot::Live(engine) => Some(engine),
            EngineSlot::Absent => None,
        }
    }

    pub(crate) fn get(&self) -> Option<&E> {
        match self {
            EngineSlot::Live(engine) => Some(engine),
            EngineSlot::Absent => None,
        }
    }

    /// 取出句柄并将槽位置为 `Absent`。
    pub(crate) fn take(&mut self) -> Option<E> {
        match std::mem::replace(self, EngineSlot::Absent) {
            EngineSlot::Live(engine) => Some(engine),
            EngineSlot::Absent => None,
        }
    }

    /// 丢弃句柄而不调用任何引擎原语，用于引擎主动销毁的场景。
    pub(crate) fn invalidate(&mut self) {
        *self = EngineSlot::Absent;
    }

    pub(crate) fn is_live(&self) -> bool {
        matches!(self, EngineSlot::Live(_))
    }
}

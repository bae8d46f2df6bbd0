//! 测试替身。
//!
//! [`MockEngine`] 以内存实现 [`EngineSocket`]：记录写入的字节、关闭与流控提示次数，
//! 并允许测试精确控制每次写入可接收的字节数（背压额度）。
//! 克隆体共享同一份状态，测试线程可以一边把它交给连接，一边在旁边观察或放行额度。

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::EngineSocket;

#[derive(Debug)]
struct MockState {
    credit: Option<usize>,
    written: Vec<u8>,
    close_calls: usize,
    read_drained_calls: usize,
    peer: SocketAddr,
    local: SocketAddr,
}

/// 可观测、可控背压的内存引擎句柄。
#[derive(Clone, Debug)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// 不限额度的引擎：每次写入全部接收。
    pub fn new() -> Self {
        Self::build(None)
    }

    /// 初始额度为 `credit` 字节的引擎，额度耗尽后写入返回 0。
    pub fn with_credit(credit: usize) -> Self {
        Self::build(Some(credit))
    }

    fn build(credit: Option<usize>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                credit,
                written: Vec::new(),
                close_calls: 0,
                read_drained_calls: 0,
                peer: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 7), 6881)),
                local: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 42069)),
            })),
        }
    }

    /// 追加写入额度；不限额度的引擎保持不变。
    pub fn grant(&self, bytes: usize) {
        let mut state = self.state.lock();
        if let Some(credit) = state.credit.as_mut() {
            *credit = credit.saturating_add(bytes);
        }
    }

    /// 已被接收的全部字节。
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// `close` 被调用的次数。
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// `read_drained` 被调用的次数。
    pub fn read_drained_calls(&self) -> usize {
        self.state.lock().read_drained_calls
    }

    /// 引擎报告的对端地址。
    pub fn peer(&self) -> SocketAddr {
        self.state.lock().peer
    }

    /// 引擎报告的本地地址。
    pub fn local(&self) -> SocketAddr {
        self.state.lock().local
    }
}

impl EngineSocket for MockEngine {
    fn write(&mut self, buf: &[u8]) -> usize {
        let mut state = self.state.lock();
        let accepted = match state.credit.as_mut() {
            Some(credit) => {
                let n = (*credit).min(buf.len());
                *credit -= n;
                n
            }
            None => buf.len(),
        };
        state.written.extend_from_slice(&buf[..accepted]);
        accepted
    }

    fn close(&mut self) {
        self.state.lock().close_calls += 1;
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.state.lock().peer)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.state.lock().local)
    }

    fn read_drained(&mut self) {
        self.state.lock().read_drained_calls += 1;
    }
}

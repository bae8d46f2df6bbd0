//! 集成测试共用的连接装配与线程工具。

#![allow(dead_code)]

use std::thread::{self, JoinHandle};
use std::time::Duration;

use spark_transport_sync::testing::MockEngine;
use spark_transport_sync::{Conn, ConnBuilder, ConnNotifier};

/// 阻塞调用进入等待所需的宽限时间。
pub const SETTLE: Duration = Duration::from_millis(30);

/// 装配好的连接三件套：观测用引擎克隆、应用侧连接、引擎侧回调句柄。
pub struct Harness {
    pub engine: MockEngine,
    pub conn: Conn<MockEngine>,
    pub notifier: ConnNotifier<MockEngine>,
}

/// 构造一条尚未建连的连接。
pub fn harness(label: &str, engine: MockEngine) -> Harness {
    let conn = ConnBuilder::new(engine.clone()).label(label).build();
    let notifier = conn.notifier();
    Harness {
        engine,
        conn,
        notifier,
    }
}

/// 构造一条已建连、引擎不限额度的连接。
pub fn connected(label: &str) -> Harness {
    let harness = harness(label, MockEngine::new());
    harness.notifier.on_connected();
    harness
}

/// 在宽限时间之后于另一线程执行 `action`，用于在主线程阻塞期间注入事件。
pub fn after_settle<F>(action: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        thread::sleep(SETTLE);
        action();
    })
}

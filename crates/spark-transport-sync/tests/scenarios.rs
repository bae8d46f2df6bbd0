#![cfg(not(any(loom, spark_loom)))]

//! 阻塞连接的端到端场景。
//!
//! # 教案级说明
//! - **Why**：单元测试覆盖了状态机的每个分支，这里从应用线程与引擎回调两侧同时驱动 [`Conn`]，
//!   验证阻塞、唤醒与错误优先级在真实线程交错下的表现；
//! - **How**：引擎替身为 [`MockEngine`]，事件注入在另一线程上经宽限时间后触发，
//!   确保主线程已进入等待；
//! - **What**：每个用例只断言调用返回的 `(字节数, 错误)` 以及引擎侧可观测的副作用。

mod support;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spark_transport_sync::testing::MockEngine;
use spark_transport_sync::{
    ConnBuilder, ConnError, ConnPhase, EngineErrorCode, TimerService, Transfer,
};
use support::{SETTLE, after_settle, connected, harness};

fn reset() -> ConnError {
    ConnError::Engine(EngineErrorCode::new(EngineErrorCode::CONNECTION_RESET))
}

#[test]
fn data_then_eof_is_read_in_two_steps() {
    let h = connected("abc-eof");
    h.notifier.on_data(&[0x41, 0x42, 0x43]);
    h.notifier.on_eof();

    let mut two = [0u8; 2];
    assert_eq!(
        h.conn.read(&mut two),
        Transfer {
            bytes: 2,
            error: None
        }
    );
    assert_eq!(two, [0x41, 0x42]);

    let mut four = [0u8; 4];
    assert_eq!(
        h.conn.read(&mut four),
        Transfer {
            bytes: 1,
            error: Some(ConnError::EndOfStream)
        }
    );
    assert_eq!(four[0], 0x43);
}

#[test]
fn eof_stays_terminal_across_reads() {
    let h = connected("eof-monotonic");
    h.notifier.on_data(b"x");
    h.notifier.on_eof();
    let mut buf = [0u8; 8];
    assert_eq!(h.conn.read(&mut buf).bytes, 1);

    for _ in 0..3 {
        let t = h.conn.read(&mut buf);
        assert_eq!(t.bytes, 0);
        assert_eq!(t.error, Some(ConnError::EndOfStream));
    }
    assert_eq!(h.conn.phase(), ConnPhase::EofPending);
}

#[test]
fn reset_during_blocked_write_reports_partial_count() {
    let h = harness("reset-write", MockEngine::with_credit(2));
    h.notifier.on_connected();

    let notifier = h.notifier.clone();
    let injector = after_settle(move || notifier.on_error(EngineErrorCode::CONNECTION_RESET));

    let t = h.conn.write(b"hello");
    injector.join().expect("注入线程不应 panic");

    assert_eq!(t.bytes, 2);
    assert_eq!(t.error, Some(reset()));
    assert_eq!(h.engine.written(), b"he");
    assert_eq!(h.conn.stats().bytes_written, 2);
}

#[test]
fn reset_is_reported_after_buffered_bytes() {
    let h = connected("reset-read");
    h.notifier.on_data(b"xy");
    h.notifier.on_error("ECONNRESET");

    let mut buf = [0u8; 8];
    let t = h.conn.read(&mut buf);
    assert_eq!(t.bytes, 2);
    assert_eq!(t.error, Some(reset()));
    assert_eq!(h.conn.phase(), ConnPhase::Errored);
}

#[test]
#[should_panic(expected = "multiple engine errors")]
fn second_engine_error_is_fatal() {
    let h = connected("double-error");
    h.notifier.on_error(EngineErrorCode::CONNECTION_RESET);
    h.notifier.on_error(EngineErrorCode::TIMED_OUT);
}

#[test]
fn close_is_idempotent() {
    let h = connected("close-twice");
    for _ in 0..3 {
        h.conn.close();
    }
    assert_eq!(h.engine.close_calls(), 1);
    assert_eq!(h.conn.phase(), ConnPhase::Closed);

    let mut buf = [0u8; 4];
    assert_eq!(h.conn.read(&mut buf).error, Some(ConnError::Closed));
    assert_eq!(
        h.conn.write(b"late"),
        Transfer {
            bytes: 0,
            error: Some(ConnError::Closed)
        }
    );
}

#[test]
fn close_wakes_a_blocked_reader() {
    let h = connected("close-wakes");
    let conn = Arc::new(h.conn);
    let reader = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            let mut buf = [0u8; 4];
            conn.read(&mut buf)
        })
    };
    thread::sleep(SETTLE);
    conn.close();

    let t = reader.join().expect("读线程不应 panic");
    assert_eq!(t.error, Some(ConnError::Closed));
}

#[test]
fn zero_length_read_never_blocks() {
    let h = connected("zero-read");
    assert_eq!(
        h.conn.read(&mut []),
        Transfer {
            bytes: 0,
            error: None
        }
    );

    h.notifier.on_destroyed();
    assert_eq!(h.conn.read(&mut []).error, Some(ConnError::Destroyed));
}

#[test]
fn zero_length_write_only_reports_state() {
    let h = connected("zero-write");
    assert_eq!(
        h.conn.write(&[]),
        Transfer {
            bytes: 0,
            error: None
        }
    );
    h.conn.set_write_deadline(Some(Instant::now()));
    assert_eq!(h.conn.write(&[]).error, Some(ConnError::DeadlineExceeded));
    assert!(h.engine.written().is_empty());
}

#[test]
fn past_read_deadline_unblocks_a_waiting_reader() {
    let h = connected("past-deadline");
    let conn = Arc::new(h.conn);
    let reader = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            let mut buf = [0u8; 4];
            let started = Instant::now();
            (conn.read(&mut buf), started.elapsed())
        })
    };
    thread::sleep(SETTLE);
    conn.set_read_deadline(Some(Instant::now()));

    let (t, waited) = reader.join().expect("读线程不应 panic");
    assert_eq!(t.error, Some(ConnError::DeadlineExceeded));
    assert!(t.error.as_ref().is_some_and(ConnError::is_timeout));
    assert!(waited < Duration::from_secs(5));
}

#[test]
fn future_read_deadline_fires_and_can_be_cleared() {
    let h = connected("future-deadline");
    let budget = Duration::from_millis(40);
    let started = Instant::now();
    h.conn.set_read_deadline(Some(started + budget));

    let mut buf = [0u8; 4];
    let t = h.conn.read(&mut buf);
    assert_eq!(t.error, Some(ConnError::DeadlineExceeded));
    assert!(started.elapsed() >= budget);

    h.conn.set_read_deadline(None);
    h.notifier.on_data(b"ok");
    assert_eq!(
        h.conn.read(&mut buf),
        Transfer {
            bytes: 2,
            error: None
        }
    );
}

#[test]
fn write_deadline_unblocks_a_backpressured_writer() {
    let h = harness("write-deadline", MockEngine::with_credit(3));
    h.notifier.on_connected();
    h.conn
        .set_deadline(Some(Instant::now() + Duration::from_millis(40)));

    let t = h.conn.write(b"abcdef");
    assert_eq!(t.bytes, 3);
    assert_eq!(t.error, Some(ConnError::DeadlineExceeded));
    assert_eq!(h.engine.written(), b"abc");
}

#[test]
fn destroy_wakes_a_blocked_reader_and_detaches_the_engine() {
    let h = connected("destroyed");
    let peer = h.conn.remote_addr();
    let local = h.conn.local_addr();
    let notifier = h.notifier.clone();
    let injector = after_settle(move || notifier.on_destroyed());

    let mut buf = [0u8; 4];
    let t = h.conn.read(&mut buf);
    injector.join().expect("注入线程不应 panic");

    assert_eq!(t.error, Some(ConnError::Destroyed));
    assert_eq!(h.conn.remote_addr(), peer, "句柄失效后返回缓存的对端地址");
    assert_eq!(h.conn.local_addr(), local);
    h.conn.close();
    assert_eq!(h.engine.close_calls(), 0, "已销毁的引擎不再收到关闭请求");
}

#[test]
fn wait_for_connect_blocks_until_the_engine_connects() {
    let h = harness("dial", MockEngine::new());
    assert_eq!(h.conn.phase(), ConnPhase::Connecting);
    let notifier = h.notifier.clone();
    let injector = after_settle(move || notifier.on_connected());

    assert_eq!(h.conn.wait_for_connect(), Ok(()));
    injector.join().expect("注入线程不应 panic");
    assert_eq!(h.conn.phase(), ConnPhase::Connected);
    assert_eq!(h.conn.remote_addr(), Some(h.engine.peer()));
}

#[test]
fn wait_for_connect_reports_refusal() {
    let h = harness("refused", MockEngine::new());
    let notifier = h.notifier.clone();
    let injector = after_settle(move || notifier.on_error(EngineErrorCode::CONNECTION_REFUSED));

    let err = h.conn.wait_for_connect().expect_err("拒绝连接必须返回错误");
    injector.join().expect("注入线程不应 panic");
    assert_eq!(err.code(), "spark.transport.sync.engine_error");
    assert_eq!(
        std::io::Error::from(err).kind(),
        std::io::ErrorKind::ConnectionRefused
    );
}

#[test]
fn wait_for_connect_returns_when_closed_before_connecting() {
    let h = harness("abandoned", MockEngine::new());
    h.conn.close();
    assert_eq!(h.conn.wait_for_connect(), Err(ConnError::Closed));
}

#[test]
fn reads_and_writes_run_concurrently() {
    let h = connected("duplex");
    let conn = Arc::new(h.conn);
    let reader = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            let mut buf = [0u8; 16];
            conn.read(&mut buf).bytes
        })
    };
    thread::sleep(SETTLE);
    assert_eq!(conn.write(b"ping").into_result(), Ok(4));
    h.notifier.on_data(b"pong");

    assert_eq!(reader.join().expect("读线程不应 panic"), 4);
    assert_eq!(h.engine.written(), b"ping");
    let stats = conn.stats();
    assert_eq!((stats.bytes_read, stats.bytes_written), (4, 4));
}

#[test]
fn draining_after_a_terminal_state_sends_no_flow_control_hint() {
    let live = connected("drain-live");
    live.notifier.on_data(b"abc");
    let mut buf = [0u8; 8];
    assert_eq!(live.conn.read(&mut buf).bytes, 3);
    assert_eq!(live.engine.read_drained_calls(), 1);

    let destroyed = connected("drain-destroyed");
    destroyed.notifier.on_data(b"abc");
    destroyed.notifier.on_destroyed();
    let t = destroyed.conn.read(&mut buf);
    assert_eq!((t.bytes, t.error), (3, Some(ConnError::Destroyed)));
    assert_eq!(destroyed.engine.read_drained_calls(), 0);

    let closed = connected("drain-closed");
    closed.notifier.on_data(b"abc");
    closed.conn.close();
    let t = closed.conn.read(&mut buf);
    assert_eq!((t.bytes, t.error), (3, Some(ConnError::Closed)));
    assert_eq!(closed.engine.read_drained_calls(), 0);
}

#[test]
fn deadline_churn_leaves_no_timer_entries_behind() {
    let timers =
        Arc::new(TimerService::with_thread_name("churn-timers").expect("spawn timer thread"));
    let conn = ConnBuilder::new(MockEngine::new())
        .label("churn")
        .timer_service(Arc::clone(&timers))
        .build();

    let horizon = Instant::now() + Duration::from_secs(3600);
    for _ in 0..10_000 {
        conn.set_read_deadline(Some(horizon));
    }
    conn.set_write_deadline(Some(horizon));
    assert_eq!(timers.pending(), 2, "每个方向至多一条登记");

    conn.set_read_deadline(None);
    assert_eq!(timers.pending(), 1);

    conn.set_deadline(Some(horizon));
    drop(conn);
    assert_eq!(timers.pending(), 0, "丢弃连接后不残留定时条目");
}

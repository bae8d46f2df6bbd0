//! 阻塞连接演示入口。
//!
//! # 说明
//! - 用一个后台“引擎线程”模拟回调驱动的传输引擎：两端连接的写入经通道交给引擎线程，
//!   再以 `on_data`/`on_eof`/`on_destroyed` 回调投递到对端；
//! - 可选的第一个命令行参数为 TOML 配置文件路径，字段见 [`ConnConfig`]。

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use spark_transport_sync::{
    Conn, ConnBuilder, ConnConfig, ConnError, ConnNotifier, EngineSocket, observability,
};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Dialer,
    Acceptor,
}

impl Side {
    fn port(self) -> u16 {
        match self {
            Side::Dialer => 40001,
            Side::Acceptor => 40002,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Dialer => 0,
            Side::Acceptor => 1,
        }
    }

    fn other(self) -> Side {
        match self {
            Side::Dialer => Side::Acceptor,
            Side::Acceptor => Side::Dialer,
        }
    }
}

enum EngineEvent {
    Data(Side, Vec<u8>),
    Close(Side),
}

/// 把写入转发给引擎线程的句柄。
struct ChannelEngine {
    side: Side,
    events: Sender<EngineEvent>,
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

impl EngineSocket for ChannelEngine {
    fn write(&mut self, buf: &[u8]) -> usize {
        match self.events.send(EngineEvent::Data(self.side, buf.to_vec())) {
            Ok(()) => buf.len(),
            Err(_) => 0,
        }
    }

    fn close(&mut self) {
        let _ = self.events.send(EngineEvent::Close(self.side));
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(loopback(self.side.other().port()))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(loopback(self.side.port()))
    }
}

fn run_engine(
    events: Receiver<EngineEvent>,
    dialer: ConnNotifier<ChannelEngine>,
    acceptor: ConnNotifier<ChannelEngine>,
) {
    let notifiers = [dialer, acceptor];
    for notifier in &notifiers {
        notifier.on_connected();
    }
    // 所有句柄都被关闭丢弃后通道断开，线程随之退出。
    while let Ok(event) = events.recv() {
        match event {
            EngineEvent::Data(from, bytes) => notifiers[from.other().index()].on_data(&bytes),
            EngineEvent::Close(from) => {
                notifiers[from.other().index()].on_eof();
                notifiers[from.index()].on_destroyed();
            }
        }
    }
}

fn load_config() -> anyhow::Result<ConnConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("读取配置文件 `{path}` 失败"))?;
            ConnConfig::from_toml_str(&source).with_context(|| format!("解析配置文件 `{path}` 失败"))
        }
        None => Ok(ConnConfig::default()),
    }
}

fn run() -> anyhow::Result<()> {
    if let Err(error) = observability::install_fmt_subscriber() {
        eprintln!("日志订阅者未安装: {error}");
    }
    let config = load_config()?;
    let timers = config.timer_service()?;
    let (events, receiver) = mpsc::channel();

    let open = |side: Side, label: String| -> Conn<ChannelEngine> {
        ConnBuilder::new(ChannelEngine {
            side,
            events: events.clone(),
        })
        .config(config.clone())
        .label(label)
        .timer_service(timers.clone())
        .build()
    };
    let dialer = open(Side::Dialer, format!("{}-dialer", config.label));
    let acceptor = open(Side::Acceptor, format!("{}-acceptor", config.label));
    drop(events);

    let engine = {
        let (d, a) = (dialer.notifier(), acceptor.notifier());
        thread::Builder::new()
            .name("demo-engine".to_owned())
            .spawn(move || run_engine(receiver, d, a))
            .context("启动引擎线程失败")?
    };

    dialer.wait_for_connect()?;
    acceptor.wait_for_connect()?;
    info!(
        local = ?dialer.local_addr(),
        remote = ?dialer.remote_addr(),
        "dialer connected"
    );

    let echo = thread::Builder::new()
        .name("demo-echo".to_owned())
        .spawn(move || -> Result<u64, ConnError> {
            let mut buf = [0u8; 256];
            let mut echoed = 0u64;
            loop {
                let read = acceptor.read(&mut buf);
                if read.bytes > 0 {
                    acceptor.write(&buf[..read.bytes]).into_result()?;
                    echoed += read.bytes as u64;
                }
                match read.error {
                    None => continue,
                    Some(ConnError::EndOfStream) => {
                        acceptor.close();
                        return Ok(echoed);
                    }
                    Some(err) => return Err(err),
                }
            }
        })
        .context("启动回显线程失败")?;

    let message = b"hello from a blocking connection";
    dialer.write(message).into_result()?;

    let mut reply = vec![0u8; message.len()];
    let mut filled = 0;
    dialer.set_read_deadline(Some(Instant::now() + Duration::from_secs(5)));
    while filled < reply.len() {
        filled += dialer.read(&mut reply[filled..]).into_result()?;
    }
    info!(reply = %String::from_utf8_lossy(&reply), "echo received");

    dialer.close();
    let echoed = echo
        .join()
        .map_err(|_| anyhow::anyhow!("回显线程 panic"))??;
    engine
        .join()
        .map_err(|_| anyhow::anyhow!("引擎线程 panic"))?;
    info!(echoed, stats = ?dialer.stats(), "demo finished");
    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("阻塞连接演示失败: {error:#}");
        std::process::exit(1);
    }
}

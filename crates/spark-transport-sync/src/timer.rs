//! 截止时间定时器。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 阻塞在条件变量上的读写线程只会在被广播时重新检查截止时间；定时器负责在截止时刻补一次广播，
//!   让没有其他事件的等待者也能及时返回 `DeadlineExceeded`。
//! - 定时器到期只触发回调，不修改任何连接标志；“是否超时”始终由等待者在持锁状态下自行判断。
//!
//! ## 逻辑（How）
//! - [`TimerService`] 持有一个后台线程与一个按 `(截止时间, 序号)` 排序的有序表；
//! - [`DeadlineTimer`] 是单个一次性定时器：`arm` 移除上一条登记并插入新条目，`disarm`/`Drop` 只移除；
//! - 后台线程在队列锁内弹出所有到期条目，释放队列锁后再逐个执行回调，回调可以放心获取连接锁。
//!
//! ## 契约（What）
//! - 锁顺序固定为“连接锁 → 队列锁”，后台线程执行回调时不持有队列锁；
//! - 取消与到期并发时（条目已被后台线程取走）最多多出一次广播，等待者重新检查谓词即可吸收。

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// 定时器到期时执行的回调。
pub(crate) type FireFn = Arc<dyn Fn() + Send + Sync + 'static>;

const DEFAULT_THREAD_NAME: &str = "spark-sync-timer";

/// 队列键：截止时间在前，登记序号区分同一时刻的多个条目。
type EntryKey = (Instant, u64);

#[derive(Default)]
struct TimerQueue {
    entries: BTreeMap<EntryKey, FireFn>,
    next_id: u64,
    shutdown: bool,
}

impl TimerQueue {
    fn head(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }
}

struct TimerShared {
    queue: Mutex<TimerQueue>,
    changed: Condvar,
}

/// 截止时间定时服务，一个后台线程服务任意多个连接。
///
/// 默认使用进程级单例 [`TimerService::global`]；测试或需要隔离的宿主可以用
/// [`TimerService::with_thread_name`] 构造独立实例，丢弃最后一个 `Arc` 时后台线程退出。
pub struct TimerService {
    shared: Arc<TimerShared>,
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("pending", &self.pending())
            .finish()
    }
}

static GLOBAL: OnceLock<Arc<TimerService>> = OnceLock::new();

impl TimerService {
    /// 进程级共享实例，首次调用时启动后台线程。
    ///
    /// # Panics
    ///
    /// 操作系统拒绝创建线程时 panic；需要显式处理该错误的调用方使用 [`TimerService::try_global`]。
    pub fn global() -> Arc<TimerService> {
        match Self::try_global() {
            Ok(service) => service,
            Err(err) => panic!("failed to spawn the deadline timer thread: {err}"),
        }
    }

    /// 进程级共享实例的可失败版本。
    ///
    /// # Errors
    ///
    /// 首次调用时线程创建失败返回底层 IO 错误；之后的调用可以重试。
    pub fn try_global() -> io::Result<Arc<TimerService>> {
        if let Some(service) = GLOBAL.get() {
            return Ok(Arc::clone(service));
        }
        // 并发初始化时落选的实例随即被丢弃，其后台线程收到关停信号后退出。
        let candidate = Arc::new(Self::with_thread_name(DEFAULT_THREAD_NAME)?);
        Ok(Arc::clone(GLOBAL.get_or_init(|| candidate)))
    }

    /// 以指定线程名启动一个独立的定时服务。
    ///
    /// # Errors
    ///
    /// 线程创建失败时返回底层 IO 错误。
    pub fn with_thread_name(name: impl Into<String>) -> io::Result<Self> {
        let shared = Arc::new(TimerShared {
            queue: Mutex::new(TimerQueue::default()),
            changed: Condvar::new(),
        });
        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name(name.into())
            .spawn(move || run(&worker))?;
        Ok(Self { shared })
    }

    /// 当前登记且尚未到期的条目数。
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    fn schedule(&self, deadline: Instant, fire: FireFn) -> EntryKey {
        let mut queue = self.shared.queue.lock();
        let key = (deadline, queue.next_id);
        queue.next_id = queue.next_id.wrapping_add(1);
        let becomes_head = queue.head().is_none_or(|head| deadline < head);
        queue.entries.insert(key, fire);
        if becomes_head {
            self.shared.changed.notify_one();
        }
        key
    }

    /// 移除登记；条目已被后台线程取走时为空操作。
    fn cancel(&self, key: EntryKey) {
        self.shared.queue.lock().entries.remove(&key);
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.shutdown = true;
        queue.entries.clear();
        self.shared.changed.notify_one();
    }
}

fn run(shared: &TimerShared) {
    let mut due = Vec::new();
    loop {
        {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                let now = Instant::now();
                while let Some(entry) = queue
                    .entries
                    .first_entry()
                    .filter(|entry| entry.key().0 <= now)
                {
                    due.push(entry.remove());
                }
                if !due.is_empty() {
                    break;
                }
                match queue.head() {
                    Some(next) => {
                        shared.changed.wait_until(&mut queue, next);
                    }
                    None => shared.changed.wait(&mut queue),
                }
            }
        }
        for fire in due.drain(..) {
            fire();
        }
    }
}

/// 单个一次性截止定时器，对应一条连接的一个方向（读或写）。
///
/// 重新登记与取消都会把旧条目从队列中移除，队列规模只取决于当前处于登记状态的定时器数量。
pub(crate) struct DeadlineTimer {
    service: Arc<TimerService>,
    fire: FireFn,
    armed: Option<EntryKey>,
}

impl fmt::Debug for DeadlineTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineTimer")
            .field("armed", &self.armed.map(|(deadline, _)| deadline))
            .finish()
    }
}

impl DeadlineTimer {
    pub(crate) fn new(service: Arc<TimerService>, fire: FireFn) -> Self {
        Self {
            service,
            fire,
            armed: None,
        }
    }

    /// 移除旧登记并在 `deadline` 时刻触发一次回调。
    pub(crate) fn arm(&mut self, deadline: Instant) {
        self.disarm();
        self.armed = Some(self.service.schedule(deadline, Arc::clone(&self.fire)));
    }

    /// 移除当前登记；未登记时为空操作。
    pub(crate) fn disarm(&mut self) {
        if let Some(key) = self.armed.take() {
            self.service.cancel(key);
        }
    }

    /// `None` 取消定时器，`Some` 重新登记。
    pub(crate) fn reset(&mut self, deadline: Option<Instant>) {
        match deadline {
            Some(at) => self.arm(at),
            None => self.disarm(),
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

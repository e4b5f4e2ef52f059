use crossbeam::atomic::AtomicCell;
use log::{debug, error};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 工作线程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Stopped,
    Running,
    QueueFull,
    QueueEmpty,
    Pausing,
    Paused,
    Ended,
}

impl Status {
    pub fn is_active(self) -> bool {
        matches!(self, Status::Running | Status::QueueFull | Status::QueueEmpty)
    }
}

/// 单个解封装/解码工作线程的生命周期管理
///
/// `start` 创建线程；`pause` 请求退出并 join；线程体返回其退出原因。
/// 注意：线程体内部不能调用本 Worker 的 `start`/`pause`。
pub struct Worker {
    name: String,
    status: Arc<AtomicCell<Status>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: Arc::new(AtomicCell::new(Status::Stopped)),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        self.status.load()
    }

    pub fn set_status(&self, status: Status) {
        self.status.store(status);
    }

    /// 线程内部使用：仅在仍处于活动状态时更新，不覆盖 Pausing
    pub fn update_active(&self, status: Status) {
        let current = self.status.load();
        if current.is_active() && current != status {
            let _ = self.status.compare_exchange(current, status);
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.load().is_active()
    }

    /// 线程是否仍存活
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }

    /// 启动线程；已在运行时返回 false
    pub fn start<F>(&self, body: F) -> bool
    where
        F: FnOnce() -> Status + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.as_ref().map_or(false, |h| !h.is_finished()) {
            return false;
        }
        if let Some(old) = handle.take() {
            let _ = old.join();
        }

        self.status.store(Status::Running);
        let status = Arc::clone(&self.status);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let exit = body();
                let final_status = if status.load() == Status::Pausing && exit != Status::Ended {
                    Status::Paused
                } else {
                    exit
                };
                status.store(final_status);
            });

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                debug!("[{}] 线程启动", self.name);
                true
            }
            Err(e) => {
                error!("[{}] ❌ 创建线程失败: {}", self.name, e);
                self.status.store(Status::Stopped);
                false
            }
        }
    }

    /// 请求线程退出并等待其结束
    pub fn pause(&self) {
        let mut handle = self.handle.lock();
        loop {
            let current = self.status.load();
            if !current.is_active() || self.status.compare_exchange(current, Status::Pausing).is_ok() {
                break;
            }
        }

        if let Some(h) = handle.take() {
            if h.thread().id() == thread::current().id() {
                *handle = Some(h);
                return;
            }
            let _ = h.join();
        }

        if self.status.load() == Status::Pausing {
            self.status.store(Status::Paused);
        }
    }

    /// 退出线程并复位为 Stopped
    pub fn stop(&self) {
        self.pause();
        self.status.store(Status::Stopped);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(h) = self.handle.get_mut().take() {
            self.status.store(Status::Pausing);
            if h.thread().id() != thread::current().id() {
                let _ = h.join();
            }
        }
    }
}

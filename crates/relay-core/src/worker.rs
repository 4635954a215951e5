use std::{fmt, sync::Arc};

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::{PipelineError, Result, WorkerPoolConfig};

/// 入站处理任务的执行池。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 反应器线程只负责就绪复用与字节搬运，解包、握手计算与应用逻辑都以任务形式提交到这里；
/// - 任务是同步闭包，借助 Tokio 的阻塞线程池执行，调用方既可以让本类型自建运行时，
///   也可以复用宿主已有的运行时。
///
/// ## 契约（What）
/// - `submit` 永不阻塞；运行时已经关闭时任务会被直接丢弃，闭包捕获的值随之析构；
/// - 自建运行时在最后一个克隆释放时以 `shutdown_background` 方式关闭，不等待仍在执行的任务。
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl WorkerPool {
    /// 按配置自建运行时。
    pub fn new(config: &WorkerPoolConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Builder::new_multi_thread();
        builder.worker_threads(1).thread_name(config.thread_name.clone());
        if config.threads > 0 {
            builder.max_blocking_threads(config.threads);
        }
        let runtime = builder
            .build()
            .map_err(|err| PipelineError::Config(format!("failed to start worker pool: {err}")))?;
        debug!(thread_name = %config.thread_name, threads = config.threads, "worker pool started");
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// 复用宿主运行时。
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// 复用当前上下文中的运行时（若存在）。
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        drop(self.handle.spawn_blocking(task));
    }

    pub fn owns_runtime(&self) -> bool {
        self.owned.is_some()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("owns_runtime", &self.owns_runtime())
            .finish()
    }
}

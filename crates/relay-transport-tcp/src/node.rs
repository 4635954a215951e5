use std::{
    fmt, mem,
    net::{SocketAddr, TcpStream as StdTcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use mio::net::TcpStream;
use parking_lot::{Mutex, RwLock};
use relay_core::{
    NeighborLink, OpenPhase, PipelineError, PipelineEvent, PipelineHandle, PipelineNode,
    PipelineSource, PipelineState, PipelineTarget, Result, WorkerPool,
};
use tracing::{debug, warn};

use crate::{
    ConnectionInfo, ConnectionListener, ReactorConfig, StopReason,
    error::{CONFIGURE, SPAWN, map_io_error},
    reactor::Reactor,
    wake::WakeSignal,
};

/// 持有一条 TCP 连接并驱动反应器线程的 Pipeline 首节点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接的全部 IO 都发生在一个专属线程上，其余节点只通过事件与状态变化唤醒它；
/// - 节点自身只保存跨线程共享的最小状态，缓冲区与 `mio::Poll` 在 `Wire` 阶段整体移交给反应器线程。
///
/// ## 逻辑（How）
/// - `Allocate`：创建 `Poll` 与 `Waker`，注册套接字，分配入站/出站区域；
/// - `Wire`：启动名为 [`ReactorConfig::thread_name`] 的线程运行事件循环；
/// - `close_node`/[`Self::close`]：只置位停止标记并唤醒，从不等待线程结束，
///   因为它可能正由反应器线程自己（经由 `Pipeline::close`）调用。
///
/// ## 契约（What）
/// - 一个节点只对应一条连接，只能被打开一次；
/// - [`ConnectionListener`] 无论循环是否启动都恰好收到一次回调。
pub struct TcpTransportNode {
    shared: Arc<Shared>,
    config: ReactorConfig,
    stage: Mutex<Stage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

enum Stage {
    Idle(TcpStream),
    Allocated(Box<Reactor>),
    Running,
    Finished,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Idle(_) => "idle",
            Stage::Allocated(_) => "allocated",
            Stage::Running => "running",
            Stage::Finished => "finished",
        }
    }
}

/// 节点与反应器线程共享的状态。
pub(crate) struct Shared {
    pub(crate) label: String,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) target: NeighborLink<dyn PipelineTarget>,
    pub(crate) wake: Arc<WakeSignal>,
    pub(crate) workers: WorkerPool,
    pipeline: RwLock<PipelineHandle>,
    stop: AtomicBool,
    /// Target 报告了 `NeedInbound`，剩余入站字节应当重新交付。
    need_inbound: AtomicBool,
    finished: AtomicBool,
    listener: Mutex<Option<Box<dyn ConnectionListener>>>,
}

impl Shared {
    pub(crate) fn pipeline(&self) -> PipelineHandle {
        self.pipeline.read().clone()
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.wake.notify();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn take_need_inbound(&self) -> bool {
        self.need_inbound.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// 回调监听方；只有第一次调用生效。
    pub(crate) fn notify_removed(&self, info: &ConnectionInfo) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.connection_removed(info);
        }
    }

    pub(crate) fn connection_info(
        &self,
        bytes_read: u64,
        bytes_written: u64,
        reason: StopReason,
    ) -> ConnectionInfo {
        ConnectionInfo {
            label: self.label.clone(),
            peer: self.peer,
            local: self.local,
            bytes_read,
            bytes_written,
            reason,
        }
    }
}

impl TcpTransportNode {
    /// 接管一条已建立的连接并切换为非阻塞模式。
    pub fn new(stream: StdTcpStream, workers: WorkerPool, config: ReactorConfig) -> Result<Self> {
        config.validate()?;
        stream
            .set_nonblocking(true)
            .map_err(|err| map_io_error(CONFIGURE, err))?;
        let peer = stream.peer_addr().ok();
        let local = stream.local_addr().ok();
        let label = match peer {
            Some(peer) => format!("tcp[{peer}]"),
            None => "tcp".to_owned(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                label,
                peer,
                local,
                target: NeighborLink::new(),
                wake: Arc::new(WakeSignal::default()),
                workers,
                pipeline: RwLock::new(PipelineHandle::detached()),
                stop: AtomicBool::new(false),
                need_inbound: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
            config,
            stage: Mutex::new(Stage::Idle(TcpStream::from_std(stream))),
            thread: Mutex::new(None),
        })
    }

    /// 注册连接移除回调。
    pub fn with_listener(self, listener: impl ConnectionListener) -> Self {
        *self.shared.listener.lock() = Some(Box::new(listener));
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local
    }

    /// 请求反应器停止，可从任意线程调用；循环按正常停止路径清理。
    pub fn close(&self) {
        debug!(node = %self.shared.label, "stop requested");
        self.shared.request_stop();
    }

    /// 反应器循环是否已经结束（或从未启动且节点已关闭）。
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// 等待反应器线程退出；在反应器线程内部调用时直接返回。
    pub fn join(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            *self.thread.lock() = Some(handle);
            return;
        }
        if handle.join().is_err() {
            warn!(node = %self.shared.label, "reactor thread panicked");
        }
    }

    fn misuse(&self, stage: &Stage) -> PipelineError {
        warn!(node = %self.shared.label, stage = stage.name(), "transport node opened out of order");
        PipelineError::Usage {
            operation: "open a transport node twice",
            state: self.shared.pipeline().state(),
        }
    }

    fn allocate(&self) -> Result<()> {
        let mut stage = self.stage.lock();
        let stream = match mem::replace(&mut *stage, Stage::Finished) {
            Stage::Idle(stream) => stream,
            other => {
                let err = self.misuse(&other);
                *stage = other;
                return Err(err);
            }
        };
        let reactor = Reactor::new(Arc::clone(&self.shared), stream, &self.config)?;
        *stage = Stage::Allocated(Box::new(reactor));
        Ok(())
    }

    fn wire(&self) -> Result<()> {
        let mut stage = self.stage.lock();
        let reactor = match mem::replace(&mut *stage, Stage::Finished) {
            Stage::Allocated(reactor) => reactor,
            other => {
                let err = self.misuse(&other);
                *stage = other;
                return Err(err);
            }
        };
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || reactor.run())
            .map_err(|err| map_io_error(SPAWN, err))?;
        *stage = Stage::Running;
        *self.thread.lock() = Some(handle);
        Ok(())
    }
}

impl PipelineNode for TcpTransportNode {
    fn name(&self) -> &str {
        &self.shared.label
    }

    fn set_pipeline(&self, pipeline: PipelineHandle) {
        *self.shared.pipeline.write() = pipeline;
    }

    fn state_has_changed(&self, state: PipelineState) {
        debug!(node = %self.shared.label, %state, "waking reactor for state change");
        self.shared.wake.notify();
    }

    fn open_node(&self, phase: OpenPhase) -> Result<()> {
        match phase {
            OpenPhase::Allocate => self.allocate(),
            OpenPhase::Wire => self.wire(),
        }
    }

    fn close_node(&self) {
        self.shared.request_stop();
        let mut stage = self.stage.lock();
        if matches!(*stage, Stage::Running) {
            return;
        }
        // 循环从未启动：资源在这里释放，监听方在这里得到通知。
        let released = mem::replace(&mut *stage, Stage::Finished);
        drop(stage);
        drop(released);
        self.shared.wake.disarm();
        self.shared.mark_finished();
        let info = self.shared.connection_info(0, 0, StopReason::NeverStarted);
        self.shared.notify_removed(&info);
    }

    fn as_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }
}

impl PipelineSource for TcpTransportNode {
    fn set_target(&self, target: Arc<dyn PipelineTarget>) {
        self.shared.target.set(&target);
    }

    fn handle_target_event(&self, event: PipelineEvent) {
        debug!(node = %self.shared.label, %event, "target event");
        if event == PipelineEvent::NeedInbound {
            self.shared.need_inbound.store(true, Ordering::Release);
        }
        self.shared.wake.notify();
    }
}

impl fmt::Debug for TcpTransportNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransportNode")
            .field("label", &self.shared.label)
            .field("stage", &self.stage.lock().name())
            .field("finished", &self.is_finished())
            .finish()
    }
}

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use relay_core::{
    ByteRegion, NeighborLink, OpenPhase, PipelineEvent, PipelineHandle, PipelineNode,
    PipelineSource, PipelineState, PipelineTarget, Result,
};
use tracing::{debug, info, trace, warn};

use crate::{
    TlsNodeConfig, TlsRole,
    engine::{Absorbed, TlsEngine},
};

/// 在上游密文与下游明文之间转换的中间节点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 反应器与应用节点都只看到字节区域；加解密、握手与关闭告警全部收敛在本节点内部；
/// - 握手计算随入站任务运行在工作线程上，反应器线程只负责搬运记录。
///
/// ## 逻辑（How）
/// - `Allocate`：按配置创建 rustls 引擎并分配明文区域，不触碰邻居；
/// - `Wire`：客户端角色此时已有 ClientHello 待发，向上游发出 `OutboundAvailable`；
/// - 入站：引擎锁内吸收密文并取出明文，锁外把明文交给下游，循环到再无进展；
/// - 出站：先让下游填满明文暂存区，再在引擎锁内加密并写出记录。
///
/// ## 契约（What）
/// - 持有引擎锁期间从不调用邻居或 Pipeline；
/// - 锁顺序固定为“明文区域 → 引擎”，入站与出站路径各自只使用自己的明文区域；
/// - 进入 `Closing` 后，下游出站排空时发送一次 `close_notify`；
/// - 收到对端 `close_notify` 后调用 `start_closing`，此前解出的明文已全部交给下游。
pub struct TlsNode {
    label: String,
    config: TlsNodeConfig,
    pipeline: RwLock<PipelineHandle>,
    source: NeighborLink<dyn PipelineSource>,
    target: NeighborLink<dyn PipelineTarget>,
    engine: Mutex<Option<TlsEngine>>,
    /// 入站明文累积区，只在入站任务中使用。
    plaintext: Mutex<ByteRegion>,
    /// 出站明文暂存区，只在反应器拉取出站时使用。
    staging: Mutex<ByteRegion>,
    handshake_complete: AtomicBool,
    closing: AtomicBool,
    close_notify_sent: AtomicBool,
}

impl TlsNode {
    pub fn new(config: TlsNodeConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let label = match config.role() {
            TlsRole::Server => "tls-server".to_owned(),
            TlsRole::Client => format!(
                "tls-client[{}]",
                config.server_name.as_deref().unwrap_or_default()
            ),
        };
        Ok(Arc::new(Self {
            label,
            plaintext: Mutex::new(ByteRegion::with_capacity(config.plaintext_capacity)),
            staging: Mutex::new(ByteRegion::with_capacity(config.plaintext_capacity)),
            config,
            pipeline: RwLock::new(PipelineHandle::detached()),
            source: NeighborLink::new(),
            target: NeighborLink::new(),
            engine: Mutex::new(None),
            handshake_complete: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            close_notify_sent: AtomicBool::new(false),
        }))
    }

    pub fn role(&self) -> TlsRole {
        self.config.role()
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::Acquire)
    }

    fn pipeline(&self) -> PipelineHandle {
        self.pipeline.read().clone()
    }

    fn signal_upstream(&self, event: PipelineEvent) {
        if let Some(source) = self.source.get() {
            source.handle_target_event(event);
        }
    }

    /// 引擎锁内的一步：吸收密文并取出明文。引擎已释放时返回 `None`。
    fn absorb(
        &self,
        ciphertext: &mut ByteRegion,
        plaintext: &mut ByteRegion,
    ) -> Result<Option<Absorbed>> {
        let mut engine = self.engine.lock();
        let Some(engine) = engine.as_mut() else {
            return Ok(None);
        };
        Ok(Some(engine.absorb(ciphertext, plaintext)?))
    }

    fn observe_handshake(&self, step: &Absorbed) {
        if step.handshaking || self.handshake_complete.swap(true, Ordering::AcqRel) {
            return;
        }
        let version = self
            .engine
            .lock()
            .as_ref()
            .and_then(TlsEngine::protocol_version);
        info!(node = %self.label, ?version, "tls handshake complete");
        if self.config.validate_on_handshake
            && let Err(err) = self.pipeline().validate()
        {
            debug!(node = %self.label, error = %err, "pipeline not validated after handshake");
        }
    }

    /// 下游出站排空后排队发送 `close_notify`。
    fn maybe_close_notify(&self, engine: &mut TlsEngine, staging: &ByteRegion) {
        if !self.closing.load(Ordering::Acquire)
            || !staging.is_empty()
            || engine.is_handshaking()
            || self.close_notify_sent.swap(true, Ordering::AcqRel)
        {
            return;
        }
        debug!(node = %self.label, "queueing close_notify");
        engine.send_close_notify();
    }
}

impl PipelineNode for TlsNode {
    fn name(&self) -> &str {
        &self.label
    }

    fn set_pipeline(&self, pipeline: PipelineHandle) {
        *self.pipeline.write() = pipeline;
    }

    fn state_has_changed(&self, state: PipelineState) {
        if state == PipelineState::Closing && !self.closing.swap(true, Ordering::AcqRel) {
            // 反应器在排空阶段继续拉取出站，`close_notify` 随之写出。
            self.signal_upstream(PipelineEvent::OutboundAvailable);
        }
    }

    fn open_node(&self, phase: OpenPhase) -> Result<()> {
        match phase {
            OpenPhase::Allocate => {
                let engine = TlsEngine::new(&self.config)?;
                *self.engine.lock() = Some(engine);
                self.plaintext.lock().clear();
                self.staging.lock().clear();
                self.handshake_complete.store(false, Ordering::Release);
                self.closing.store(false, Ordering::Release);
                self.close_notify_sent.store(false, Ordering::Release);
                debug!(node = %self.label, role = %self.role(), "tls engine allocated");
            }
            OpenPhase::Wire => {
                let pending = self
                    .engine
                    .lock()
                    .as_ref()
                    .is_some_and(TlsEngine::wants_write);
                if pending {
                    self.signal_upstream(PipelineEvent::OutboundAvailable);
                }
            }
        }
        Ok(())
    }

    fn close_node(&self) {
        let released = self.engine.lock().take();
        if released.is_some() {
            debug!(
                node = %self.label,
                close_notify_sent = self.close_notify_sent.load(Ordering::Acquire),
                "tls engine released"
            );
        }
    }

    fn as_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn PipelineTarget>> {
        Some(self)
    }
}

impl PipelineSource for TlsNode {
    fn set_target(&self, target: Arc<dyn PipelineTarget>) {
        self.target.set(&target);
    }

    fn handle_target_event(&self, event: PipelineEvent) {
        trace!(node = %self.label, %event, "forwarding target event");
        self.signal_upstream(event);
    }
}

impl PipelineTarget for TlsNode {
    fn set_source(&self, source: Arc<dyn PipelineSource>) {
        self.source.set(&source);
    }

    fn handle_inbound(&self, ciphertext: &mut ByteRegion) -> Result<()> {
        let target = self.target.require()?;
        let mut plaintext = self.plaintext.lock();
        let mut peer_closed = false;

        loop {
            let Some(step) = self.absorb(ciphertext, &mut plaintext)? else {
                debug!(node = %self.label, bytes = ciphertext.len(), "engine released, dropping records");
                ciphertext.clear();
                return Ok(());
            };
            self.observe_handshake(&step);
            peer_closed |= step.peer_closed;

            if step.decrypted > 0 {
                trace!(node = %self.label, bytes = plaintext.len(), "plaintext delivered");
                target.handle_inbound(&mut plaintext)?;
            }
            if !step.progressed() {
                break;
            }
        }

        let (wants_write, wants_read) = match self.engine.lock().as_ref() {
            Some(engine) => (engine.wants_write(), engine.wants_read()),
            None => (false, false),
        };
        drop(plaintext);

        if peer_closed {
            info!(node = %self.label, "peer sent close_notify");
            self.pipeline().start_closing();
        }
        if wants_write {
            self.signal_upstream(PipelineEvent::OutboundAvailable);
        } else if wants_read {
            self.signal_upstream(PipelineEvent::NeedInbound);
        }
        Ok(())
    }

    fn give_outbound(&self, ciphertext: &mut ByteRegion) -> Result<()> {
        let mut staging = self.staging.lock();
        if staging.has_room()
            && let Some(target) = self.target.get()
        {
            target.give_outbound(&mut staging)?;
        }

        let mut engine = self.engine.lock();
        let Some(engine) = engine.as_mut() else {
            return Ok(());
        };
        if !self.close_notify_sent.load(Ordering::Acquire) {
            let accepted = engine.accept_plaintext(&mut staging)?;
            if accepted > 0 {
                trace!(node = %self.label, accepted, "plaintext accepted");
            }
        } else if !staging.is_empty() {
            warn!(node = %self.label, bytes = staging.len(), "dropping plaintext written after close_notify");
            staging.clear();
        }
        self.maybe_close_notify(engine, &staging);
        engine.seal(ciphertext)?;
        Ok(())
    }
}

impl fmt::Debug for TlsNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsNode")
            .field("label", &self.label)
            .field("role", &self.role())
            .field("handshake_complete", &self.is_handshake_complete())
            .finish()
    }
}

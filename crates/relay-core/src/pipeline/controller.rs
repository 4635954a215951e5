use std::{
    cell::RefCell,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info, warn};

use super::{OpenPhase, PipelineNode, PipelineSource, PipelineState, PipelineTarget};
use crate::{
    Result,
    error::{Capability, PipelineError, StructuralError},
};

/// 有序节点链及其状态机的唯一所有者。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 统一负责拓扑校验、相邻节点链接、两阶段打开与逆序关闭；
/// - 作为 [`PipelineState`] 的唯一写者，每次状态变化都同步广播给全部节点。
///
/// ## 逻辑（How）
/// - 节点列表、状态与“节点已关闭”标记位于同一把可重入锁之后；
/// - 状态广播在持锁期间完成，节点可以在 `state_has_changed` 中重入查询 Pipeline，
///   其他线程则必须等广播结束才能读到新状态；
/// - `Pipeline` 本身是廉价克隆的句柄，节点持有的是不延长生命周期的 [`PipelineHandle`]。
///
/// ## 契约（What）
/// - 新建 Pipeline 处于 `Closed`；
/// - `open` 失败时所有节点都会被关闭，状态强制为 `Invalid`，错误原样（包裹阶段与节点名）返回；
/// - `close` 幂等，`Invalid` 在关闭后保持 `Invalid`。
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    label: String,
    core: ReentrantMutex<RefCell<PipelineCore>>,
}

struct PipelineCore {
    nodes: Vec<Arc<dyn PipelineNode>>,
    state: PipelineState,
    nodes_closed: bool,
}

type CoreGuard<'a> = ReentrantMutexGuard<'a, RefCell<PipelineCore>>;

/// 已通过拓扑校验、待链接的节点能力。
struct Linkage {
    sources: Vec<Arc<dyn PipelineSource>>,
    targets: Vec<Arc<dyn PipelineTarget>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_label("pipeline")
    }

    /// 以日志标签构造 Pipeline。
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                label: label.into(),
                core: ReentrantMutex::new(RefCell::new(PipelineCore {
                    nodes: Vec::with_capacity(3),
                    state: PipelineState::Closed,
                    nodes_closed: true,
                })),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// 供节点保存的弱引用句柄。
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn node_count(&self) -> usize {
        self.lock().borrow().nodes.len()
    }

    pub fn state(&self) -> PipelineState {
        self.lock().borrow().state
    }

    pub fn is_usable(&self) -> bool {
        self.state().is_usable()
    }

    /// 追加节点。
    ///
    /// 同一节点（同一分配）不可重复加入；Pipeline 可用期间（`>= Open`）禁止修改节点链。
    pub fn add(&self, node: Arc<dyn PipelineNode>) -> Result<&Self> {
        let guard = self.lock();
        {
            let core = guard.borrow();
            if core.state.is_usable() {
                return Err(StructuralError::PipelineInUse { state: core.state }.into());
            }
            if core.nodes.iter().any(|existing| same_node(existing, &node)) {
                return Err(StructuralError::DuplicateNode {
                    node: node.name().to_owned(),
                }
                .into());
            }
        }

        node.set_pipeline(self.handle());
        debug!(pipeline = %self.label(), node = node.name(), "node added");
        guard.borrow_mut().nodes.push(node);
        Ok(self)
    }

    /// 校验拓扑、链接相邻节点并执行两阶段打开。
    pub fn open(&self) -> Result<()> {
        let guard = self.lock();
        let nodes = {
            let core = guard.borrow();
            if core.state > PipelineState::Closed {
                return Err(StructuralError::AlreadyOpen { state: core.state }.into());
            }
            core.nodes.clone()
        };

        let linkage = check_topology(&nodes)?;
        for (index, (source, target)) in linkage
            .sources
            .iter()
            .zip(linkage.targets.iter())
            .enumerate()
        {
            source.set_target(Arc::clone(target));
            target.set_source(Arc::clone(source));
            debug!(
                pipeline = %self.label(),
                source = nodes[index].name(),
                target = nodes[index + 1].name(),
                "nodes linked"
            );
        }

        for phase in OpenPhase::ALL {
            for node in &nodes {
                if let Err(err) = node.open_node(phase) {
                    warn!(
                        pipeline = %self.label(),
                        node = node.name(),
                        %phase,
                        error = %err,
                        "node failed to open, closing pipeline"
                    );
                    guard.borrow_mut().nodes_closed = true;
                    for opened in nodes.iter().rev() {
                        opened.close_node();
                    }
                    self.transition(&guard, PipelineState::Invalid);
                    return Err(PipelineError::OpenFailed {
                        phase,
                        node: node.name().to_owned(),
                        source: Box::new(err),
                    });
                }
            }
        }

        guard.borrow_mut().nodes_closed = false;
        self.transition(&guard, PipelineState::Open);
        Ok(())
    }

    /// 逆序关闭所有节点，幂等。
    ///
    /// 最下游节点最先关闭，此时它仍能看到存活的上游；传输节点最后关闭。
    pub fn close(&self) {
        let guard = self.lock();
        if guard.borrow().nodes_closed {
            return;
        }
        let nodes = {
            let mut core = guard.borrow_mut();
            core.nodes_closed = true;
            core.nodes.clone()
        };

        for node in nodes.iter().rev() {
            node.close_node();
        }

        if guard.borrow().state != PipelineState::Invalid {
            self.transition(&guard, PipelineState::Closed);
        }
        info!(pipeline = %self.label(), state = %guard.borrow().state, "pipeline closed");
    }

    /// `Open → Valid`；已经 `Valid` 时忽略。
    pub fn validate(&self) -> Result<()> {
        let guard = self.lock();
        let state = guard.borrow().state;
        match state {
            PipelineState::Open => {
                self.transition(&guard, PipelineState::Valid);
                Ok(())
            }
            PipelineState::Valid => Ok(()),
            state => Err(PipelineError::Usage {
                operation: "validate",
                state,
            }),
        }
    }

    /// 无条件进入 `Invalid`，并记录原因。
    pub fn invalidate(&self, reason: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        let guard = self.lock();
        self.transition(&guard, PipelineState::Invalid);
        match cause {
            Some(cause) => {
                warn!(pipeline = %self.label(), reason, error = %cause, "pipeline invalidated")
            }
            None => warn!(pipeline = %self.label(), reason, "pipeline invalidated"),
        }
    }

    /// 仅在可用时进入 `Closing`。
    pub fn start_closing(&self) {
        let guard = self.lock();
        let state = guard.borrow().state;
        if state.is_usable() && state != PipelineState::Closing {
            self.transition(&guard, PipelineState::Closing);
        }
    }

    fn lock(&self) -> CoreGuard<'_> {
        self.inner.core.lock()
    }

    /// 写入新状态并在持锁期间广播；`RefCell` 借用在回调前释放，允许节点重入。
    fn transition(&self, guard: &CoreGuard<'_>, next: PipelineState) {
        let (previous, nodes) = {
            let mut core = guard.borrow_mut();
            let previous = core.state;
            core.state = next;
            (previous, core.nodes.clone())
        };
        info!(pipeline = %self.label(), from = %previous, to = %next, "pipeline state changed");
        for node in &nodes {
            node.state_has_changed(next);
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .field("nodes", &self.node_count())
            .finish()
    }
}

/// 节点持有的 Pipeline 弱引用。
///
/// Pipeline 被释放后，查询类方法返回 `Closed`/`false`，变更类方法成为空操作
/// （`validate` 返回 [`PipelineError::Detached`]）。
#[derive(Clone, Default)]
pub struct PipelineHandle {
    inner: Weak<PipelineInner>,
}

impl PipelineHandle {
    /// 尚未挂接任何 Pipeline 的句柄。
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Pipeline> {
        self.inner.upgrade().map(|inner| Pipeline { inner })
    }

    pub fn state(&self) -> PipelineState {
        self.upgrade()
            .map_or(PipelineState::Closed, |pipeline| pipeline.state())
    }

    pub fn is_usable(&self) -> bool {
        self.state().is_usable()
    }

    pub fn validate(&self) -> Result<()> {
        self.upgrade().ok_or(PipelineError::Detached)?.validate()
    }

    pub fn invalidate(&self, reason: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        if let Some(pipeline) = self.upgrade() {
            pipeline.invalidate(reason, cause);
        }
    }

    pub fn start_closing(&self) {
        if let Some(pipeline) = self.upgrade() {
            pipeline.start_closing();
        }
    }

    pub fn close(&self) {
        if let Some(pipeline) = self.upgrade() {
            pipeline.close();
        }
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(pipeline) => f
                .debug_struct("PipelineHandle")
                .field("label", &pipeline.label())
                .finish(),
            None => f.write_str("PipelineHandle(detached)"),
        }
    }
}

fn same_node(a: &Arc<dyn PipelineNode>, b: &Arc<dyn PipelineNode>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// 节点 *i* 是 Source 当且仅当 *i* 不是最后一个；是 Target 当且仅当 *i* 不是第一个。
fn check_topology(nodes: &[Arc<dyn PipelineNode>]) -> Result<Linkage> {
    if nodes.len() < 2 {
        return Err(StructuralError::TooFewNodes { count: nodes.len() }.into());
    }

    let last = nodes.len() - 1;
    let mut linkage = Linkage {
        sources: Vec::with_capacity(last),
        targets: Vec::with_capacity(last),
    };

    for (index, node) in nodes.iter().enumerate() {
        let source = Arc::clone(node).as_source();
        let target = Arc::clone(node).as_target();
        check_capability(index, node, Capability::Source, index < last, source.is_some())?;
        check_capability(index, node, Capability::Target, index > 0, target.is_some())?;
        linkage.sources.extend(source);
        linkage.targets.extend(target);
    }

    Ok(linkage)
}

fn check_capability(
    index: usize,
    node: &Arc<dyn PipelineNode>,
    capability: Capability,
    expected: bool,
    actual: bool,
) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(StructuralError::Capability {
        index,
        node: node.name().to_owned(),
        capability,
        expected,
    }
    .into())
}

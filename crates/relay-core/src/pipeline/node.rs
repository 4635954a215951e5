use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;

use super::{OpenPhase, PipelineEvent, PipelineHandle, PipelineState};
use crate::{ByteRegion, PipelineError, Result};

/// Pipeline 中每个阶段都必须实现的生命周期契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - Pipeline 由调用方在运行期动态拼装，节点是否具备 Source/Target 能力只能在运行期判定，
///   因此能力以 [`Self::as_source`]/[`Self::as_target`] 查询的形式暴露，而非类型层约束；
/// - 节点只通过 [`PipelineHandle`] 回指 Pipeline，用于查询状态与触发
///   `validate`/`invalidate`/`start_closing`。
///
/// ## 契约（What）
/// - `set_pipeline`：在 `open` 之前由 [`Pipeline::add`](super::Pipeline::add) 调用且仅调用一次；
/// - `state_has_changed`：尽力而为的状态通知，在 Pipeline 锁内同步调用；实现不得阻塞，
///   需要唤醒阻塞等待的节点（例如反应器）在此发出唤醒；
/// - `open_node`：每次打开中每个阶段只调用一次，`Allocate` 阶段不得触碰邻居；
/// - `close_node`：释放私有资源，必须幂等且不失败，部分打开失败时同样会被调用；
/// - 能力查询默认返回 `None`，具备能力的节点覆写为 `Some(self)`。
pub trait PipelineNode: Send + Sync + 'static {
    /// 日志与错误信息中使用的节点名称。
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn set_pipeline(&self, pipeline: PipelineHandle);

    fn state_has_changed(&self, _state: PipelineState) {}

    fn open_node(&self, phase: OpenPhase) -> Result<()>;

    fn close_node(&self);

    fn as_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        None
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn PipelineTarget>> {
        None
    }
}

/// 入站数据的产出方：把字节交给下游，并接收下游发来的 [`PipelineEvent`]。
pub trait PipelineSource: PipelineNode {
    fn set_target(&self, target: Arc<dyn PipelineTarget>);

    fn handle_target_event(&self, event: PipelineEvent);
}

/// 入站数据的消费方，同时按需向上游提供出站字节。
///
/// - `handle_inbound`：从区域头部消费能处理的字节，未消费部分留待下次调用；
/// - `give_outbound`：最多追加区域剩余容量的字节，不得扩容。
pub trait PipelineTarget: PipelineNode {
    fn set_source(&self, source: Arc<dyn PipelineSource>);

    fn handle_inbound(&self, inbound: &mut ByteRegion) -> Result<()>;

    fn give_outbound(&self, outbound: &mut ByteRegion) -> Result<()>;
}

/// 指向相邻节点的弱引用槽位。
///
/// Pipeline 独占节点的强引用，节点之间只保留弱引用，避免 Source/Target 互指造成引用环。
pub struct NeighborLink<T: ?Sized> {
    slot: RwLock<Option<Weak<T>>>,
}

impl<T: ?Sized> NeighborLink<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    pub fn set(&self, neighbor: &Arc<T>) {
        *self.slot.write() = Some(Arc::downgrade(neighbor));
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().as_ref().and_then(Weak::upgrade)
    }

    /// 获取邻居，未链接或邻居已释放时返回 [`PipelineError::Detached`]。
    pub fn require(&self) -> Result<Arc<T>> {
        self.get().ok_or(PipelineError::Detached)
    }

    pub fn is_linked(&self) -> bool {
        self.get().is_some()
    }
}

impl<T: ?Sized> Default for NeighborLink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for NeighborLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeighborLink")
            .field("linked", &self.is_linked())
            .finish()
    }
}

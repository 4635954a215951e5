use std::sync::Arc;

use tracing::{debug, trace};

use super::{
    NeighborLink, OpenPhase, PipelineEvent, PipelineHandle, PipelineNode, PipelineSource,
    PipelineState, PipelineTarget,
};
use crate::{ByteRegion, Result};

/// 透明转发并记录每一次跨越它的调用的中间节点。
///
/// 可插入 Pipeline 的任意中间位置，用于排查字节流在相邻阶段之间的走向：
/// 入站/出站只记录字节数，事件与生命周期调用记录名称。
#[derive(Debug)]
pub struct TracingInterceptor {
    label: String,
    source: NeighborLink<dyn PipelineSource>,
    target: NeighborLink<dyn PipelineTarget>,
}

impl TracingInterceptor {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            source: NeighborLink::new(),
            target: NeighborLink::new(),
        })
    }
}

impl PipelineNode for TracingInterceptor {
    fn name(&self) -> &str {
        &self.label
    }

    fn set_pipeline(&self, pipeline: PipelineHandle) {
        debug!(node = %self.label, ?pipeline, "set_pipeline called");
    }

    fn state_has_changed(&self, state: PipelineState) {
        debug!(node = %self.label, %state, "state_has_changed called");
    }

    fn open_node(&self, phase: OpenPhase) -> Result<()> {
        debug!(node = %self.label, %phase, "open_node called");
        Ok(())
    }

    fn close_node(&self) {
        debug!(node = %self.label, "close_node called");
    }

    fn as_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }

    fn as_target(self: Arc<Self>) -> Option<Arc<dyn PipelineTarget>> {
        Some(self)
    }
}

impl PipelineSource for TracingInterceptor {
    fn set_target(&self, target: Arc<dyn PipelineTarget>) {
        debug!(node = %self.label, target = target.name(), "set_target called");
        self.target.set(&target);
    }

    fn handle_target_event(&self, event: PipelineEvent) {
        debug!(node = %self.label, %event, "handle_target_event called");
        if let Some(source) = self.source.get() {
            source.handle_target_event(event);
        }
    }
}

impl PipelineTarget for TracingInterceptor {
    fn set_source(&self, source: Arc<dyn PipelineSource>) {
        debug!(node = %self.label, source = source.name(), "set_source called");
        self.source.set(&source);
    }

    fn handle_inbound(&self, inbound: &mut ByteRegion) -> Result<()> {
        let offered = inbound.len();
        self.target.require()?.handle_inbound(inbound)?;
        trace!(
            node = %self.label,
            offered,
            consumed = offered.saturating_sub(inbound.len()),
            "inbound passed through"
        );
        Ok(())
    }

    fn give_outbound(&self, outbound: &mut ByteRegion) -> Result<()> {
        let before = outbound.len();
        self.target.require()?.give_outbound(outbound)?;
        trace!(
            node = %self.label,
            produced = outbound.len().saturating_sub(before),
            room = outbound.remaining_capacity(),
            "outbound passed through"
        );
        Ok(())
    }
}

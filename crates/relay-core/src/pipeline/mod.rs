//! Pipeline 节点契约、状态机与通用节点实现。

mod controller;
mod interceptor;
mod node;
mod outbound;
mod state;

pub use controller::{Pipeline, PipelineHandle};
pub use interceptor::TracingInterceptor;
pub use node::{NeighborLink, PipelineNode, PipelineSource, PipelineTarget};
pub use outbound::BufferedOutbound;
pub use state::{OpenPhase, PipelineEvent, PipelineState};

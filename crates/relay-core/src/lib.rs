#![deny(unsafe_code)]
#![doc = r#"
# relay-core

## 设计动机（Why）
- **定位**：双向字节流 Pipeline 引擎的核心契约层。入站字节从面向传输的节点流向应用逻辑，
  出站字节沿同一条链反向流回；TLS、协议分帧等较重的阶段叠加在传输节点之上，自身不持有 IO 线程。
- **架构角色**：`relay-transport-tcp`（反应器节点）与 `relay-transport-tls`（TLS 分层节点）
  均只依赖本 crate 暴露的节点契约与 [`Pipeline`] 状态机。

## 核心契约（What）
- [`PipelineNode`]：生命周期契约（挂接 Pipeline、感知状态变化、两阶段打开、关闭）；
- [`PipelineSource`] / [`PipelineTarget`]：按能力选择实现的方向性扩展；
- [`Pipeline`]：拓扑校验、相邻节点链接、两阶段打开/逆序关闭，并且是 [`PipelineState`] 的唯一写者；
- [`BufferedOutbound`]：线程安全的出站分片队列，可排入调用方提供的 [`ByteRegion`]；
- [`WorkerPool`]：入站处理任务提交的工作线程池。

## 实现策略（How）
- 状态与节点列表由同一把可重入锁保护，状态广播在持锁期间同步完成；
- 节点之间只持有弱引用，Pipeline 独占节点列表；
- 所有错误统一映射为 [`PipelineError`]，并携带稳定错误码。
"#]

pub mod buffer;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod worker;

pub use buffer::ByteRegion;
pub use config::WorkerPoolConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{
    BufferedOutbound, NeighborLink, OpenPhase, Pipeline, PipelineEvent, PipelineHandle,
    PipelineNode, PipelineSource, PipelineState, PipelineTarget, TracingInterceptor,
};
pub use worker::WorkerPool;

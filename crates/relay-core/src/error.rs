//! Pipeline 引擎的统一错误模型。
//!
//! # 契约（What）
//! - 每个变体都对应一个稳定错误码（[`PipelineError::code`]），日志与测试均以错误码识别失败类别；
//! - 结构性错误（拓扑、重复添加、运行期复用）总是同步返回给 `add`/`open` 的调用方；
//! - 传输错误仅终止所属连接的反应器循环，不会跨连接传播；
//! - 协议错误配合 [`Pipeline::invalidate`](crate::Pipeline::invalidate) 使用，迫使 Pipeline 进入 `Invalid`。

use std::{fmt, io};

use thiserror::Error;

use crate::pipeline::{OpenPhase, PipelineState};

/// 携带任意来源的装箱错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 引擎内部统一使用的返回别名。
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// 描述一次底层 IO 操作的稳定错误码与默认文案。
///
/// 传输实现以常量形式声明自己的操作集合（`read`、`write`、`register` 等），
/// 再通过 [`PipelineError::transport`] 将 `io::Error` 包装为带上下文的错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoOperation {
    pub code: &'static str,
    pub name: &'static str,
}

impl fmt::Display for IoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 节点需要暴露的方向性能力。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    Source,
    Target,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Source => f.write_str("PipelineSource"),
            Capability::Target => f.write_str("PipelineTarget"),
        }
    }
}

/// 拓扑与装配阶段的结构性错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructuralError {
    #[error("node `{node}` is already part of the pipeline")]
    DuplicateNode { node: String },
    #[error("nodes can not be added while the pipeline is {state}")]
    PipelineInUse { state: PipelineState },
    #[error("pipeline is already open (state {state})")]
    AlreadyOpen { state: PipelineState },
    #[error("a pipeline needs at least two nodes, got {count}")]
    TooFewNodes { count: usize },
    #[error(
        "node #{index} `{node}` should {} a {capability}, but {}",
        should_be(.expected),
        actually_is(.expected)
    )]
    Capability {
        index: usize,
        node: String,
        capability: Capability,
        expected: bool,
    },
}

fn should_be(expected: &bool) -> &'static str {
    if *expected { "be" } else { "not be" }
}

fn actually_is(expected: &bool) -> &'static str {
    if *expected { "is not" } else { "is" }
}

/// Pipeline 引擎的错误枚举。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 拓扑非法、重复添加或在使用中修改 Pipeline。
    #[error("pipeline structure violation: {0}")]
    Structural(#[from] StructuralError),
    /// 在当前状态下不允许的调用。
    #[error("`{operation}` is not allowed while the pipeline is {state}")]
    Usage {
        operation: &'static str,
        state: PipelineState,
    },
    /// 节点持有的 Pipeline 已被释放。
    #[error("node is not attached to a live pipeline")]
    Detached,
    /// 读写、注册、轮询等 IO 操作失败。
    #[error("{operation} failed: {source}")]
    Transport {
        operation: IoOperation,
        #[source]
        source: io::Error,
    },
    /// 节点检测到无法恢复的协议违规。
    #[error("protocol violation: {reason}")]
    Protocol {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    /// 两阶段打开过程中某个节点失败。
    #[error("pipeline open failed during {phase} at node `{node}`: {source}")]
    OpenFailed {
        phase: OpenPhase,
        node: String,
        #[source]
        source: Box<PipelineError>,
    },
    /// 入站处理任务在工作线程上 panic。
    #[error("inbound task panicked: {0}")]
    TaskPanicked(String),
    /// 配置解析或校验失败。
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn transport(operation: IoOperation, source: io::Error) -> Self {
        PipelineError::Transport { operation, source }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        PipelineError::Protocol {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn protocol_with<E>(reason: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        PipelineError::Protocol {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Structural(_) => "relay.pipeline.structural",
            PipelineError::Usage { .. } => "relay.pipeline.usage",
            PipelineError::Detached => "relay.pipeline.detached",
            PipelineError::Transport { operation, .. } => operation.code,
            PipelineError::Protocol { .. } => "relay.pipeline.protocol",
            PipelineError::OpenFailed { .. } => "relay.pipeline.open_failed",
            PipelineError::TaskPanicked(_) => "relay.pipeline.task_panicked",
            PipelineError::Config(_) => "relay.config",
        }
    }

    /// 是否属于结构性错误（包括被 `OpenFailed` 包裹的情况）。
    pub fn is_structural(&self) -> bool {
        match self {
            PipelineError::Structural(_) => true,
            PipelineError::OpenFailed { source, .. } => source.is_structural(),
            _ => false,
        }
    }
}

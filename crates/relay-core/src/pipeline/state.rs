use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline 状态机。
///
/// # 契约（What）
/// - 变体声明顺序即全序：`Invalid < Closed < Open < Valid < Closing`，
///   [`PipelineState::is_usable`] 直接基于该顺序判定；
/// - `Closed`：逻辑与物理均已关闭，新建 Pipeline 的初始状态；
/// - `Open`：传输已建立、节点已初始化，但尚未完成应用层确认（例如握手前）；
/// - `Valid`：完全可用，入站与出站数据均可流动；
/// - `Closing`：仍处于 `Valid` 语义，但不再接受新的入站数据，等待出站排空后关闭；
/// - `Invalid`：发生致命错误，正常关闭路径不会把它改回 `Closed`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Invalid,
    Closed,
    Open,
    Valid,
    Closing,
}

impl PipelineState {
    /// `Open`、`Valid`、`Closing` 视为可用。
    pub fn is_usable(self) -> bool {
        self >= PipelineState::Open
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineState::Invalid => "INVALID",
            PipelineState::Closed => "CLOSED",
            PipelineState::Open => "OPEN",
            PipelineState::Valid => "VALID",
            PipelineState::Closing => "CLOSING",
        };
        f.write_str(label)
    }
}

/// 由下游发往上游的无方向通知：请反应器重新评估就绪状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// 下游需要更多入站数据。
    NeedInbound,
    /// 下游有新的出站数据可供拉取。
    OutboundAvailable,
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::NeedInbound => f.write_str("NEED_INBOUND"),
            PipelineEvent::OutboundAvailable => f.write_str("OUTBOUND_AVAILABLE"),
        }
    }
}

/// 两阶段打开协议的阶段。
///
/// - `Allocate`：只分配节点私有资源，不得与邻居交互（邻居可能尚未就绪）；
/// - `Wire`：执行需要邻居参与的动作，例如启动事件循环。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpenPhase {
    Allocate,
    Wire,
}

impl OpenPhase {
    /// 按执行顺序排列的全部阶段。
    pub const ALL: [OpenPhase; 2] = [OpenPhase::Allocate, OpenPhase::Wire];
}

impl fmt::Display for OpenPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenPhase::Allocate => f.write_str("allocate"),
            OpenPhase::Wire => f.write_str("wire"),
        }
    }
}

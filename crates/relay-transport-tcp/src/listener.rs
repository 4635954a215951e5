use std::{fmt, net::SocketAddr};

use relay_core::PipelineState;

/// 反应器循环结束的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// 调用了 [`TcpTransportNode::close`](crate::TcpTransportNode::close) 或 Pipeline 关闭了本节点。
    Requested,
    /// 对端关闭了写方向，且所有已读字节都已交给下游。
    EndOfStream,
    /// `Closing` 状态下出站数据已全部写出。
    Drained,
    /// Pipeline 不再可用（通常已进入 `Invalid`）。
    PipelineUnusable(PipelineState),
    /// 读写或轮询失败。
    TransportFailed,
    /// 下一阶段在拉取出站数据时失败。
    NodeFailed,
    /// 反应器线程从未启动（例如两阶段打开中途失败）。
    NeverStarted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("requested"),
            StopReason::EndOfStream => f.write_str("end_of_stream"),
            StopReason::Drained => f.write_str("drained"),
            StopReason::PipelineUnusable(state) => write!(f, "pipeline_unusable({state})"),
            StopReason::TransportFailed => f.write_str("transport_failed"),
            StopReason::NodeFailed => f.write_str("node_failed"),
            StopReason::NeverStarted => f.write_str("never_started"),
        }
    }
}

/// 连接移除时交给 [`ConnectionListener`] 的快照。
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    pub label: String,
    pub peer: Option<SocketAddr>,
    pub local: Option<SocketAddr>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub reason: StopReason,
}

/// 接收连接移除通知的监听方（通常是接受连接的服务端）。
///
/// 每个节点至多回调一次，调用发生在连接关闭之后、Pipeline 关闭之前。
pub trait ConnectionListener: Send + Sync + 'static {
    fn connection_removed(&self, info: &ConnectionInfo);
}

impl<F> ConnectionListener for F
where
    F: Fn(&ConnectionInfo) + Send + Sync + 'static,
{
    fn connection_removed(&self, info: &ConnectionInfo) {
        self(info)
    }
}

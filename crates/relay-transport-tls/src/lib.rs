#![deny(unsafe_code)]
#![doc = r#"
# relay-transport-tls

## 设计动机（Why）
- **定位**：Pipeline 的中间节点，在两个按字节工作的邻居之间加解密 TLS 记录；
  自身不持有 IO 线程，入站处理运行在反应器提交的工作线程任务中。
- **架构角色**：同时实现 [`PipelineSource`](relay_core::PipelineSource) 与
  [`PipelineTarget`](relay_core::PipelineTarget)，通常位于
  `relay-transport-tcp` 的反应器节点与应用节点之间。

## 核心契约（What）
- 入站：密文交给 rustls，解出的明文累积后交给下游，直到本批密文消费完毕；
  随后按引擎状态向上游发出 `OutboundAvailable`（需要写出）或 `NeedInbound`（需要更多密文）；
- 出站：先让下游填充明文暂存区，交给引擎后总是尝试把待发记录写入上游区域，
  即使没有应用数据（握手与告警记录同样经由这里发出）；
- 握手计算发生在 `process_new_packets` 中，也就是入站任务所在的工作线程上，从不占用反应器线程；
- 进入 `Closing` 且下游出站排空后发送 `close_notify`；收到对端 `close_notify` 时让 Pipeline 进入 `Closing`。

## 实现策略（How）
- 引擎锁只包住 rustls 调用本身，调用邻居或 Pipeline 时从不持有，避免与 Pipeline 关闭路径互相等待；
- 引擎以枚举统一服务端与客户端连接，方法逐一委派。
"#]

mod config;
mod engine;
mod error;
mod node;

pub use config::{TlsCredentials, TlsNodeConfig, TlsPemConfig, TlsRole};
pub use error::{TlsError, TlsOperation};
pub use node::TlsNode;

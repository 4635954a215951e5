#![deny(unsafe_code)]
#![doc = r#"
# relay-transport-tcp

## 设计动机（Why）
- **定位**：Pipeline 的首节点。独占一条已建立的 TCP 连接与一个 `mio::Poll`，
  在专属反应器线程上完成就绪复用、读入与写出，不在该线程上执行任何协议逻辑。
- **架构角色**：只实现 [`PipelineSource`](relay_core::PipelineSource)；入站区域以任务形式移交给
  [`WorkerPool`](relay_core::WorkerPool) 上的下一阶段，出站区域由下一阶段按需填充。

## 核心契约（What）
- **输入条件**：调用方负责 accept/connect，只把建立好的 `std::net::TcpStream` 交给
  [`TcpTransportNode::new`]；
- **输出保障**：同一时刻至多一个入站任务在途；任务失败（错误或 panic）在任务边界转换为
  `invalidate`；循环以任何原因退出时都会关闭连接、回调 [`ConnectionListener`] 一次并关闭 Pipeline；
- **取消**：[`TcpTransportNode::close`] 可从任意线程调用，视为正常停止。

## 实现策略（How）
- **边沿触发**：套接字一次性注册读写兴趣，读写就绪提示保留到操作返回 `WouldBlock` 为止；
- **唤醒**：状态变化与下游事件置位粘滞标记并触发 `mio::Waker`，反应器在评估就绪前先交换标记，
  不会丢失任何唤醒；
- **所有权移交**：入站区域被移动进任务，通过单槽 `oneshot` 归还，反应器在借出期间无法触碰它。

## 风险与考量（Trade-offs）
- 仅当区域收到新字节时才再次提交任务；下游长期不消费且区域被填满时 Pipeline 会被判为 `Invalid`；
- IO 错误只终止本连接的循环，不会把 Pipeline 标记为 `Invalid`。
"#]

mod config;
mod error;
mod handoff;
mod listener;
mod node;
mod reactor;
mod wake;

pub use config::ReactorConfig;
pub use listener::{ConnectionInfo, ConnectionListener, StopReason};
pub use node::TcpTransportNode;

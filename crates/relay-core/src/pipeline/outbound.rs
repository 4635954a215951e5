use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use parking_lot::Mutex;

use super::{PipelineEvent, PipelineSource};
use crate::ByteRegion;

/// 待发送出站分片的线程安全 FIFO。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用节点可以在任意线程写出数据，由反应器在下一轮迭代通过 `give_outbound` 拉取；
/// - 自带独立的锁，与 Pipeline 全局锁互不嵌套，通知在释放队列锁之后发出。
///
/// ## 契约（What）
/// - `write`：非空分片入队，`Bytes` 不可变，所有权随调用转移给队列；
///   自动刷新开启且挂接了 Source 时，立即发出 [`PipelineEvent::OutboundAvailable`]；
/// - `give_outbound`：从队头依次排入输出区域，只放得下一部分的分片被零拷贝切分，
///   前缀写入区域，后缀放回队头，既不丢失也不重复；
/// - `remaining`：队列中字节总数，供调用方做背压判断或观测。
#[derive(Debug)]
pub struct BufferedOutbound {
    source: Option<Weak<dyn PipelineSource>>,
    queue: Mutex<OutboundQueue>,
}

#[derive(Debug)]
struct OutboundQueue {
    chunks: VecDeque<Bytes>,
    auto_flush: bool,
}

impl BufferedOutbound {
    /// `source` 为 `None` 时，`write`/`flush` 不会发出任何通知。
    pub fn new(source: Option<&Arc<dyn PipelineSource>>) -> Self {
        Self {
            source: source.map(Arc::downgrade),
            queue: Mutex::new(OutboundQueue {
                chunks: VecDeque::new(),
                auto_flush: true,
            }),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().chunks.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().chunks.is_empty()
    }

    pub fn auto_flush(&self) -> bool {
        self.queue.lock().auto_flush
    }

    /// 设置自动刷新并返回先前的取值。
    pub fn set_auto_flush(&self, auto_flush: bool) -> bool {
        std::mem::replace(&mut self.queue.lock().auto_flush, auto_flush)
    }

    /// 无条件通知 Source 有出站数据。
    pub fn flush(&self) {
        if let Some(source) = self.source.as_ref().and_then(Weak::upgrade) {
            source.handle_target_event(PipelineEvent::OutboundAvailable);
        }
    }

    pub fn write(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let notify = {
            let mut queue = self.queue.lock();
            queue.chunks.push_back(chunk);
            queue.auto_flush
        };
        if notify {
            self.flush();
        }
    }

    /// 复制切片后入队。
    pub fn write_slice(&self, data: &[u8]) {
        self.write(Bytes::copy_from_slice(data));
    }

    pub fn give_outbound(&self, output: &mut ByteRegion) {
        let mut queue = self.queue.lock();
        while output.has_room() {
            let Some(mut chunk) = queue.chunks.pop_front() else {
                break;
            };
            let room = output.remaining_capacity();
            if chunk.len() > room {
                let head = chunk.split_to(room);
                output.put_slice(&head);
                queue.chunks.push_front(chunk);
            } else {
                output.put_slice(&chunk);
            }
        }
    }
}

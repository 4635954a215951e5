use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use mio::Waker;
use parking_lot::Mutex;
use tracing::warn;

/// 粘滞唤醒信号。
///
/// `notify` 先置位标记，只有标记由 `false` 变为 `true` 时才触发 `Waker`；
/// 反应器在评估就绪状态之前调用 [`WakeSignal::take`] 清除标记，
/// 因此清除之前到达的通知会被本轮评估看到，清除之后到达的通知一定会打断下一次 `poll`。
#[derive(Default)]
pub(crate) struct WakeSignal {
    pending: AtomicBool,
    waker: Mutex<Option<Arc<Waker>>>,
}

impl WakeSignal {
    pub(crate) fn arm(&self, waker: Arc<Waker>) {
        *self.waker.lock() = Some(waker);
    }

    pub(crate) fn disarm(&self) {
        self.waker.lock().take();
    }

    pub(crate) fn notify(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(waker) = self.waker.lock().as_ref()
            && let Err(err) = waker.wake()
        {
            warn!(error = %err, "failed to wake reactor");
        }
    }

    /// 取出并清除挂起的通知。
    pub(crate) fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

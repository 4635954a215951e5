use relay_core::ByteRegion;
use tokio::sync::oneshot::{self, error::TryRecvError};

/// 入站区域的单槽移交。
///
/// 区域要么在反应器手中（`home`），要么被移动进唯一的在途任务，
/// 由任务通过 `oneshot` 归还；借出期间反应器拿不到任何可变引用。
pub(crate) struct InboundSlot {
    home: Option<ByteRegion>,
    lent: Option<oneshot::Receiver<ByteRegion>>,
    /// 借出时区域内的字节数，用于计算任务消费了多少。
    lent_len: usize,
}

/// [`InboundSlot::collect`] 的结果。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Collected {
    /// 没有在途任务。
    Idle,
    /// 任务仍在执行。
    Running,
    /// 任务已归还区域，并从头部消费了 `consumed` 个字节。
    Returned { consumed: usize },
    /// 任务在归还之前被丢弃（例如工作线程池已关闭），区域随之丢失。
    Lost,
}

impl InboundSlot {
    pub(crate) fn new(region: ByteRegion) -> Self {
        Self {
            home: Some(region),
            lent: None,
            lent_len: 0,
        }
    }

    pub(crate) fn is_lent(&self) -> bool {
        self.lent.is_some()
    }

    pub(crate) fn region(&self) -> Option<&ByteRegion> {
        self.home.as_ref()
    }

    pub(crate) fn region_mut(&mut self) -> Option<&mut ByteRegion> {
        self.home.as_mut()
    }

    /// 借出区域，并返回任务归还时使用的发送端。
    pub(crate) fn lend(&mut self) -> Option<(ByteRegion, oneshot::Sender<ByteRegion>)> {
        let region = self.home.take()?;
        let (reply, returned) = oneshot::channel();
        self.lent = Some(returned);
        self.lent_len = region.len();
        Some((region, reply))
    }

    pub(crate) fn collect(&mut self) -> Collected {
        let Some(returned) = self.lent.as_mut() else {
            return Collected::Idle;
        };
        match returned.try_recv() {
            Ok(region) => {
                self.lent = None;
                let consumed = self.lent_len.saturating_sub(region.len());
                self.home = Some(region);
                Collected::Returned { consumed }
            }
            Err(TryRecvError::Empty) => Collected::Running,
            Err(TryRecvError::Closed) => {
                self.lent = None;
                Collected::Lost
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_travels_out_and_back() {
        let mut slot = InboundSlot::new(ByteRegion::with_capacity(8));
        slot.region_mut().expect("home").put_slice(b"abc");

        let (mut region, reply) = slot.lend().expect("lend");
        assert!(slot.is_lent());
        assert!(slot.region().is_none());
        assert!(slot.lend().is_none(), "only one task may hold the region");
        assert_eq!(slot.collect(), Collected::Running);

        region.consume(2);
        reply.send(region).expect("send");
        assert_eq!(slot.collect(), Collected::Returned { consumed: 2 });
        assert_eq!(slot.region().expect("home").as_slice(), b"c");
        assert_eq!(slot.collect(), Collected::Idle);
    }

    #[test]
    fn untouched_region_reports_nothing_consumed() {
        let mut slot = InboundSlot::new(ByteRegion::with_capacity(8));
        slot.region_mut().expect("home").put_slice(b"abc");

        let (region, reply) = slot.lend().expect("lend");
        reply.send(region).expect("send");
        assert_eq!(slot.collect(), Collected::Returned { consumed: 0 });
        assert_eq!(slot.region().expect("home").len(), 3);
    }

    #[test]
    fn dropped_task_loses_the_region() {
        let mut slot = InboundSlot::new(ByteRegion::with_capacity(8));
        let (region, reply) = slot.lend().expect("lend");
        drop((region, reply));
        assert_eq!(slot.collect(), Collected::Lost);
        assert!(!slot.is_lent());
        assert!(slot.region().is_none());
    }
}

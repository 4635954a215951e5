use std::{
    any::Any,
    io,
    net::Shutdown,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, Waker, net::TcpStream};
use relay_core::{
    ByteRegion, PipelineError, PipelineHandle, PipelineState, PipelineTarget, Result,
};
use tracing::{debug, info, info_span, trace, warn};

use crate::{
    ReactorConfig, StopReason,
    error::{POLL, READ, REGISTER, WRITE, map_io_error},
    handoff::{Collected, InboundSlot},
    node::Shared,
};

const STREAM: Token = Token(0);
const WAKE: Token = Token(1);

/// 反应器线程独占的全部资源。
pub(crate) struct Reactor {
    shared: Arc<Shared>,
    poll: Poll,
    events: Events,
    stream: TcpStream,
    inbound: InboundSlot,
    outbound: ByteRegion,
    idle: Duration,
    /// 边沿触发下记住的就绪提示，直到操作返回 `WouldBlock` 才清除。
    readable: bool,
    writable: bool,
    /// 入站区域中有值得再次交付的字节：读到了新字节，
    /// 或上一个任务有所消费而仍留有剩余，或 Target 报告了 `NeedInbound`。
    fresh: bool,
    eof: bool,
    bytes_read: u64,
    bytes_written: u64,
}

impl Reactor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        mut stream: TcpStream,
        config: &ReactorConfig,
    ) -> Result<Self> {
        let poll = Poll::new().map_err(|err| map_io_error(POLL, err))?;
        let waker = Waker::new(poll.registry(), WAKE).map_err(|err| map_io_error(REGISTER, err))?;
        poll.registry()
            .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)
            .map_err(|err| map_io_error(REGISTER, err))?;
        shared.wake.arm(Arc::new(waker));

        Ok(Self {
            shared,
            poll,
            events: Events::with_capacity(config.events_capacity),
            stream,
            inbound: InboundSlot::new(ByteRegion::with_capacity(config.inbound_capacity)),
            outbound: ByteRegion::with_capacity(config.outbound_capacity),
            idle: config.idle_poll_interval(),
            readable: false,
            writable: false,
            fresh: false,
            eof: false,
            bytes_read: 0,
            bytes_written: 0,
        })
    }

    pub(crate) fn run(mut self) {
        let span = info_span!("reactor", node = %self.shared.label);
        let _entered = span.enter();
        info!("reactor started");

        let reason = match self.drive() {
            Ok(reason) => reason,
            Err(err) => self.fail(err),
        };
        self.shutdown(reason);
    }

    fn drive(&mut self) -> Result<StopReason> {
        loop {
            // 先清除唤醒标记再评估：此后到达的通知一定会打断本轮的 poll。
            self.shared.wake.take();
            if self.shared.stop_requested() {
                return Ok(StopReason::Requested);
            }
            let pipeline = self.shared.pipeline();
            let state = pipeline.state();
            if !state.is_usable() {
                return Ok(StopReason::PipelineUnusable(state));
            }

            match self.inbound.collect() {
                Collected::Lost => {
                    pipeline
                        .invalidate("inbound task was dropped before returning its region", None);
                    continue;
                }
                Collected::Returned { consumed } if consumed > 0 && self.has_leftover() => {
                    trace!(consumed, "re-offering leftover inbound bytes");
                    self.fresh = true;
                }
                Collected::Returned { .. } | Collected::Idle | Collected::Running => {}
            }
            // 借出期间保留标记，等区域归还后再处理。
            if !self.inbound.is_lent() && self.shared.take_need_inbound() && self.has_leftover() {
                trace!("next stage asked for inbound, re-offering leftover bytes");
                self.fresh = true;
            }

            {
                let target = self.shared.target.require()?;
                self.hand_off(&target, &pipeline);
                if self.outbound.has_room() {
                    target.give_outbound(&mut self.outbound)?;
                }
            }

            let outstanding = self.inbound.is_lent();
            let closing = state == PipelineState::Closing;
            let want_write = !self.outbound.is_empty();
            let want_read = !outstanding
                && !closing
                && !self.eof
                && self.inbound.region().is_some_and(ByteRegion::has_room);

            if closing && !want_write && !outstanding {
                return Ok(StopReason::Drained);
            }
            if self.eof && !outstanding && !self.fresh && !want_write {
                if self.has_leftover() {
                    debug!(
                        leftover = self.inbound.region().map_or(0, ByteRegion::len),
                        "end of stream with unconsumed inbound bytes"
                    );
                }
                return Ok(StopReason::EndOfStream);
            }
            if !outstanding && !self.fresh && self.inbound.region().is_some_and(ByteRegion::is_full)
            {
                pipeline.invalidate("inbound region is full but the next stage consumed nothing", None);
                continue;
            }

            let actionable = (want_read && self.readable) || (want_write && self.writable);
            let timeout = if actionable { Duration::ZERO } else { self.idle };
            trace!(
                ?timeout,
                want_read,
                want_write,
                outstanding,
                "waiting for readiness"
            );
            self.wait(timeout)?;

            if want_read && self.readable {
                self.read_ready()?;
            }
            if want_write && self.writable {
                self.write_ready()?;
            }
        }
    }

    fn has_leftover(&self) -> bool {
        self.inbound.region().is_some_and(|region| !region.is_empty())
    }

    /// 把带有待交付字节的入站区域移动进工作线程上的任务。
    fn hand_off(&mut self, target: &Arc<dyn PipelineTarget>, pipeline: &PipelineHandle) {
        if !self.fresh {
            return;
        }
        let Some((mut region, reply)) = self.inbound.lend() else {
            return;
        };
        self.fresh = false;
        trace!(bytes = region.len(), "inbound region handed off");

        let target = Arc::clone(target);
        let pipeline = pipeline.clone();
        let wake = Arc::clone(&self.shared.wake);
        self.shared.workers.submit(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| target.handle_inbound(&mut region))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => pipeline.invalidate("while handling inbound", Some(&err)),
                Err(payload) => {
                    let err = PipelineError::TaskPanicked(panic_message(payload.as_ref()));
                    pipeline.invalidate("while handling inbound", Some(&err));
                }
            }
            // 反应器可能已经退出，区域随任务一起释放即可。
            let _ = reply.send(region);
            wake.notify();
        });
    }

    fn wait(&mut self, timeout: Duration) -> Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(map_io_error(POLL, err)),
        }
        for event in self.events.iter() {
            if event.token() != STREAM {
                continue;
            }
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                self.readable = true;
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                self.writable = true;
            }
        }
        Ok(())
    }

    fn read_ready(&mut self) -> Result<()> {
        let Some(region) = self.inbound.region_mut() else {
            return Ok(());
        };
        while region.has_room() {
            match region.read_from(&mut self.stream) {
                Ok(0) => {
                    debug!("peer closed its write side");
                    self.eof = true;
                    break;
                }
                Ok(read) => {
                    self.fresh = true;
                    self.bytes_read += read as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.readable = false;
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(map_io_error(READ, err)),
            }
        }
        Ok(())
    }

    fn write_ready(&mut self) -> Result<()> {
        while !self.outbound.is_empty() {
            match self.outbound.write_to(&mut self.stream) {
                Ok(0) => {
                    return Err(map_io_error(
                        WRITE,
                        io::Error::from(io::ErrorKind::WriteZero),
                    ));
                }
                Ok(written) => self.bytes_written += written as u64,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.writable = false;
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(map_io_error(WRITE, err)),
            }
        }
        Ok(())
    }

    fn fail(&self, err: PipelineError) -> StopReason {
        match err {
            PipelineError::Transport { .. } => {
                warn!(error = %err, code = err.code(), "transport failed, stopping reactor");
                StopReason::TransportFailed
            }
            err => {
                self.shared
                    .pipeline()
                    .invalidate("reactor loop failed", Some(&err));
                StopReason::NodeFailed
            }
        }
    }

    /// 释放区域、注销并关闭连接，回调监听方，最后关闭 Pipeline。
    fn shutdown(mut self, reason: StopReason) {
        if let Err(err) = self.poll.registry().deregister(&mut self.stream) {
            debug!(error = %err, "deregister failed");
        }
        if let Err(err) = self.stream.shutdown(Shutdown::Write) {
            debug!(error = %err, "shutdown failed");
        }
        let info = self
            .shared
            .connection_info(self.bytes_read, self.bytes_written, reason);
        let shared = Arc::clone(&self.shared);
        drop(self);

        info!(
            %reason,
            bytes_read = info.bytes_read,
            bytes_written = info.bytes_written,
            "reactor stopped"
        );
        shared.wake.disarm();
        shared.mark_finished();
        shared.notify_removed(&info);
        shared.pipeline().close();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

//! State and behavior common to every descriptor kind: close scheduling,
//! callback delivery, heartbeat bookkeeping and proxy wiring.

use std::{os::fd::RawFd, rc::Rc};

use eventide_core::{Binding, Event, Interest, Micros};
use tracing::{debug, warn};

use crate::table::ReactorCtx;

/// Inbound read buffer size per syscall. The syscall is offered one byte
/// less so a guard NUL always fits one past the payload.
pub const READ_CHUNK: usize = 16 * 1024;

/// Per-tick bound on read/recv iterations, so one busy descriptor cannot
/// starve the rest of the reactor.
pub const READ_ITERATIONS: usize = 10;

/// Scatter-gather segments assembled per stream write.
pub const WRITE_SEGMENTS: usize = 16;

/// Datagrams sent per writable tick.
pub const DGRAM_SEND_BURST: usize = 10;

/// The capability set the reactor drives. One vtable covers every
/// descriptor kind; kind-specific operations live on the concrete types
/// behind the binding table.
pub trait Descriptor {
    fn binding(&self) -> Binding;

    fn on_readable(&mut self);
    fn on_writable(&mut self);

    /// The poller reported HUP/ERR for this descriptor.
    fn on_error(&mut self);

    /// Coarse timer tick; enforces connect and inactivity timeouts.
    fn heartbeat(&mut self, now: Micros);

    /// Pure predicate: should the poller watch for readability.
    fn select_for_read(&self) -> bool;

    /// Pure predicate: should the poller watch for writability.
    fn select_for_write(&self) -> bool;

    fn interest(&self) -> Interest {
        Interest::from_rw(self.select_for_read(), self.select_for_write())
    }

    /// True once the reactor should retire this descriptor. Monotonic.
    fn should_delete(&self) -> bool;

    fn schedule_close(&mut self, after_writing: bool);

    /// Terminal teardown: emits `Unbound` (unless suppressed), notifies a
    /// proxy partner, releases the socket. Idempotent.
    fn unbind(&mut self);

    /// The polled OS handle, `None` once closed.
    fn raw_fd(&self) -> Option<RawFd>;
}

/// Common per-descriptor state. Owned by each concrete descriptor; the
/// reactor context is shared and outlives it.
pub(crate) struct Lifecycle {
    pub ctx: Rc<ReactorCtx>,
    pub binding: Binding,
    pub created_at: Micros,
    pub last_activity: Micros,
    pub close_now: bool,
    pub close_after_writing: bool,
    pub close_was_scheduled: bool,
    pub attached: bool,
    pub watch_only: bool,
    pub paused: bool,
    /// Microseconds; 0 disables.
    pub inactivity_timeout: Micros,
    /// Microseconds; 0 disables. Only meaningful while a connect is
    /// pending.
    pub pending_connect_timeout: Micros,
    pub callback_unbind: bool,
    pub unbind_reason: i32,
    pub unbound_sent: bool,
    /// Loop time of the currently queued heartbeat, 0 when none.
    pub next_heartbeat: Micros,
    /// Where my inbound bytes go.
    pub proxy_target: Option<Binding>,
    /// Bytes left before the proxy completes; `None` proxies forever.
    pub proxy_remaining: Option<u64>,
    pub proxied_bytes: u64,
    /// Who feeds me.
    pub proxied_from: Option<Binding>,
    /// High-water mark for my outbound queue while I am a proxy target;
    /// crossing it pauses the feeder. 0 means unlimited.
    pub max_outbound_buf_size: usize,
}

impl Lifecycle {
    pub fn new(ctx: Rc<ReactorCtx>, binding: Binding) -> Self {
        let now = ctx.reactor.loop_time();
        Self {
            ctx,
            binding,
            created_at: now,
            last_activity: now,
            close_now: false,
            close_after_writing: false,
            close_was_scheduled: false,
            attached: false,
            watch_only: false,
            paused: false,
            inactivity_timeout: 0,
            pending_connect_timeout: 0,
            callback_unbind: true,
            unbind_reason: 0,
            unbound_sent: false,
            next_heartbeat: 0,
            proxy_target: None,
            proxy_remaining: None,
            proxied_bytes: 0,
            proxied_from: None,
            max_outbound_buf_size: 0,
        }
    }

    pub fn deliver(&self, event: Event<'_>) {
        self.ctx.sink.deliver(self.binding, event);
    }

    /// Asks the poller to re-read the interest predicates.
    pub fn touch_interest(&self) {
        self.ctx.reactor.modify(self.binding);
    }

    pub fn mark_activity(&mut self) {
        self.last_activity = self.ctx.reactor.loop_time();
    }

    pub fn schedule_close(&mut self, after_writing: bool) {
        if after_writing {
            self.close_after_writing = true;
        } else {
            self.close_now = true;
        }
        self.close_was_scheduled = true;
        self.ctx.reactor.close_scheduled();
        self.touch_interest();
    }

    pub fn should_delete(&self, open: bool, outbound_bytes: usize) -> bool {
        !open || self.close_now || (self.close_after_writing && outbound_bytes == 0)
    }

    pub fn inactivity_expired(&self, now: Micros) -> bool {
        self.inactivity_timeout > 0 &&
            now.saturating_sub(self.last_activity) + self.ctx.reactor.timer_quantum() >=
                self.inactivity_timeout
    }

    pub fn expire(&mut self) {
        self.unbind_reason = libc::ETIMEDOUT;
        self.schedule_close(false);
    }

    /// Replaces the queued heartbeat, if any, with one at `at`.
    pub fn reschedule_heartbeat(&mut self, at: Option<Micros>) {
        if self.next_heartbeat != 0 {
            self.ctx.reactor.clear_heartbeat(self.next_heartbeat, self.binding);
            self.next_heartbeat = 0;
        }
        if let Some(at) = at {
            self.next_heartbeat = at;
            self.ctx.reactor.queue_heartbeat(self.binding, at);
        }
    }

    /// Hands inbound bytes to the proxy link when one is active, splitting
    /// at the byte limit; anything past the limit (or everything, when not
    /// proxying) is delivered as a `Read` event.
    pub fn route_inbound(&mut self, data: &[u8]) {
        let Some(target_binding) = self.proxy_target else {
            self.deliver(Event::Read(data));
            return;
        };

        let fwd_len = match self.proxy_remaining {
            Some(rem) => data.len().min(usize::try_from(rem).unwrap_or(usize::MAX)),
            None => data.len(),
        };
        let (fwd, rest) = data.split_at(fwd_len);

        let Some(target) = self.ctx.entry(target_binding) else {
            warn!(target = %target_binding, "proxy: target vanished");
            self.proxy_target = None;
            self.proxy_remaining = None;
            self.unbind_reason = libc::EPIPE;
            self.schedule_close(false);
            return;
        };

        if target.feed_bytes(fwd).is_err() {
            warn!(target = %target_binding, "proxy: target cannot take bytes");
            self.proxy_target = None;
            self.proxy_remaining = None;
            self.unbind_reason = libc::EPIPE;
            self.schedule_close(false);
            return;
        }
        self.proxied_bytes += fwd.len() as u64;

        let completed = match self.proxy_remaining {
            Some(rem) => {
                let rem = rem - fwd.len() as u64;
                self.proxy_remaining = Some(rem);
                rem == 0
            }
            None => false,
        };

        if completed {
            self.proxy_target = None;
            self.proxy_remaining = None;
            target.end_feed();
            self.deliver(Event::ProxyCompleted);
            if !rest.is_empty() {
                self.deliver(Event::Read(rest));
            }
            return;
        }

        // backpressure: the link stays up, so stop reading until the
        // target drains below its high-water mark
        let (queued, high_water) = target.outbound_level();
        if high_water > 0 && queued > high_water && !self.paused {
            debug!(target = %target_binding, queued, high_water, "proxy: pausing feeder");
            self.paused = true;
            self.touch_interest();
        }
    }

    /// Binds this descriptor's inbound stream to `target`. Claims the
    /// target first so a busy target leaves existing state untouched.
    pub fn start_proxy_to(
        &mut self,
        target: Binding,
        high_water: usize,
        length: u64,
    ) -> Result<(), eventide_core::ApiError> {
        if target == self.binding {
            return Err(eventide_core::ApiError::ProxySelf);
        }
        let entry = self
            .ctx
            .entry(target)
            .ok_or(eventide_core::ApiError::UnknownBinding(target))?;
        entry.begin_feed(self.binding, high_water)?;
        self.stop_proxy();
        self.proxy_target = Some(target);
        self.proxy_remaining = (length > 0).then_some(length);
        self.proxied_bytes = 0;
        Ok(())
    }

    /// Tears down an outgoing proxy link, leaving the target untouched
    /// otherwise.
    pub fn stop_proxy(&mut self) {
        if let Some(t) = self.proxy_target.take() {
            if let Some(entry) = self.ctx.entry(t) {
                entry.end_feed();
            }
        }
        self.proxy_remaining = None;
    }

    /// Emits the terminal events exactly once and settles both ends of any
    /// proxy link. The socket itself is the concrete descriptor's business.
    pub fn emit_unbound(&mut self) {
        if self.unbound_sent {
            return;
        }
        self.unbound_sent = true;
        self.reschedule_heartbeat(None);
        if self.callback_unbind {
            self.deliver(Event::Unbound(self.unbind_reason));
        }
        if let Some(src) = self.proxied_from.take() {
            if let Some(entry) = self.ctx.entry(src) {
                self.ctx.sink.deliver(src, Event::ProxyTargetUnbound);
                entry.clear_proxy_target();
            }
        }
        if let Some(t) = self.proxy_target.take() {
            if let Some(entry) = self.ctx.entry(t) {
                entry.end_feed();
            }
        }
        if self.close_was_scheduled {
            self.ctx.reactor.close_finished();
        }
    }
}

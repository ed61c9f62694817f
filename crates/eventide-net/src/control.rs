//! The two utility descriptors: the loopbreak self-pipe and the
//! filesystem-watch source. Both are read-only, own no byte stream, and
//! delegate their readable edge back to the reactor. Neither emits an
//! `Unbound` event, and neither ever closes its fd — the reactor owns it.

use std::{os::fd::RawFd, rc::Rc};

use eventide_core::{Binding, Micros, safe_panic};

use crate::{
    descriptor::{Descriptor, Lifecycle},
    table::{Entry, ReactorCtx, register},
};

/// Read end of the self-pipe other threads write to when they need the
/// reactor to wake up and run scheduled work.
pub struct LoopbreakDescriptor {
    st: Lifecycle,
    fd: RawFd,
}

impl LoopbreakDescriptor {
    pub fn new(ctx: &Rc<ReactorCtx>, fd: RawFd) -> Binding {
        register(ctx, |mut st| {
            st.callback_unbind = false;
            st.attached = true;
            Entry::Loopbreak(Rc::new(std::cell::RefCell::new(Self { st, fd })))
        })
    }
}

impl Descriptor for LoopbreakDescriptor {
    fn binding(&self) -> Binding {
        self.st.binding
    }

    fn on_readable(&mut self) {
        self.st.ctx.reactor.read_loop_breaker();
    }

    fn on_writable(&mut self) {
        safe_panic!("loopbreak: writable event on the self-pipe");
    }

    fn on_error(&mut self) {
        self.st.schedule_close(false);
    }

    fn heartbeat(&mut self, _now: Micros) {}

    fn select_for_read(&self) -> bool {
        true
    }

    fn select_for_write(&self) -> bool {
        false
    }

    fn should_delete(&self) -> bool {
        self.st.should_delete(true, 0)
    }

    fn schedule_close(&mut self, after_writing: bool) {
        let _ = after_writing;
        self.st.schedule_close(false);
    }

    fn unbind(&mut self) {
        self.st.ctx.reactor.deregister(self.st.binding);
        self.st.emit_unbound();
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd)
    }
}

/// Kernel filesystem-event source (inotify or equivalent). The reactor
/// reads and decodes the event stream; this descriptor only keeps the fd
/// polled.
pub struct WatchDescriptor {
    st: Lifecycle,
    fd: RawFd,
}

impl WatchDescriptor {
    pub fn new(ctx: &Rc<ReactorCtx>, fd: RawFd) -> Binding {
        register(ctx, |mut st| {
            st.callback_unbind = false;
            st.attached = true;
            Entry::Watch(Rc::new(std::cell::RefCell::new(Self { st, fd })))
        })
    }
}

impl Descriptor for WatchDescriptor {
    fn binding(&self) -> Binding {
        self.st.binding
    }

    fn on_readable(&mut self) {
        self.st.ctx.reactor.read_watch_events();
    }

    fn on_writable(&mut self) {
        safe_panic!("watch: writable event on the watch source");
    }

    fn on_error(&mut self) {
        self.st.schedule_close(false);
    }

    fn heartbeat(&mut self, _now: Micros) {}

    fn select_for_read(&self) -> bool {
        true
    }

    fn select_for_write(&self) -> bool {
        false
    }

    fn should_delete(&self) -> bool {
        self.st.should_delete(true, 0)
    }

    fn schedule_close(&mut self, after_writing: bool) {
        let _ = after_writing;
        self.st.schedule_close(false);
    }

    fn unbind(&mut self) {
        self.st.ctx.reactor.deregister(self.st.binding);
        self.st.emit_unbound();
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd)
    }
}

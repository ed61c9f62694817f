//! The listening descriptor: a bounded nonblocking accept loop that turns
//! kernel connections into registered stream descriptors.

use std::{net::SocketAddr, os::fd::RawFd, rc::Rc};

use eventide_core::{Binding, Event, Micros, SetupError, safe_panic};
use tracing::{debug, warn};

use crate::{
    connection::ConnectionDescriptor,
    descriptor::{Descriptor, Lifecycle},
    sock::{ListenSock, TcpListenSock, transient},
    table::{Entry, ReactorCtx, register},
};

pub struct AcceptorDescriptor {
    st: Lifecycle,
    sock: Option<Box<dyn ListenSock>>,
}

impl AcceptorDescriptor {
    pub fn listen(ctx: &Rc<ReactorCtx>, addr: SocketAddr) -> Result<Binding, SetupError> {
        let sock = TcpListenSock::bind(addr)?;
        Ok(Self::adopt(ctx, Box::new(sock)))
    }

    pub fn adopt(ctx: &Rc<ReactorCtx>, sock: Box<dyn ListenSock>) -> Binding {
        register(ctx, |st| {
            Entry::Acceptor(Rc::new(std::cell::RefCell::new(Self { st, sock: Some(sock) })))
        })
    }

    fn close_hard(&mut self) {
        if let Some(sock) = self.sock.take() {
            self.st.ctx.reactor.deregister(self.st.binding);
            drop(sock);
        }
    }
}

impl Descriptor for AcceptorDescriptor {
    fn binding(&self) -> Binding {
        self.st.binding
    }

    fn on_readable(&mut self) {
        let burst = self.st.ctx.reactor.simultaneous_accept_count().max(1);
        for _ in 0..burst {
            if self.st.close_now || self.sock.is_none() {
                break;
            }
            let accepted = match self.sock.as_mut() {
                Some(s) => s.accept(),
                None => break,
            };
            match accepted {
                Ok((mut stream, peer)) => {
                    self.st.mark_activity();
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(?e, %peer, "accept: nodelay failed");
                    }
                    let conn = ConnectionDescriptor::adopt(&self.st.ctx, stream);
                    debug!(%peer, binding = %conn, "accept: new connection");
                    self.st.deliver(Event::Accepted(conn));
                }
                Err(e) if transient(&e) => break,
                Err(e) => {
                    // fd exhaustion and friends; the listener stays up
                    warn!(binding = %self.st.binding, ?e, "accept: failed");
                    break;
                }
            }
        }
    }

    fn on_writable(&mut self) {
        safe_panic!("accept: writable event on an acceptor");
    }

    fn on_error(&mut self) {
        self.st.schedule_close(false);
    }

    fn heartbeat(&mut self, _now: Micros) {}

    fn select_for_read(&self) -> bool {
        self.sock.is_some()
    }

    fn select_for_write(&self) -> bool {
        false
    }

    fn should_delete(&self) -> bool {
        self.st.should_delete(self.sock.is_some(), 0)
    }

    fn schedule_close(&mut self, after_writing: bool) {
        // a listener has no outbound queue to drain
        let _ = after_writing;
        self.st.schedule_close(false);
    }

    fn unbind(&mut self) {
        self.close_hard();
        self.st.emit_unbound();
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.sock.as_ref().map(|s| s.raw_fd())
    }
}

//! The datagram descriptor: message-oriented UDP with per-packet
//! destinations and reply-to-last-peer semantics.

use std::{net::SocketAddr, os::fd::RawFd, rc::Rc};

use eventide_core::{ApiError, Binding, Micros, SetupError, SockKind};
use tracing::{debug, warn};

use crate::{
    descriptor::{DGRAM_SEND_BURST, Descriptor, Lifecycle, READ_CHUNK, READ_ITERATIONS},
    page::{OutboundPage, PageQueue},
    sock::{DgramSock, UdpSock, errno_of, transient},
    table::{Entry, ReactorCtx, register},
};

pub struct DatagramDescriptor {
    st: Lifecycle,
    sock: Option<Box<dyn DgramSock>>,
    outbound: PageQueue,
    /// Sender of the most recently received packet; replies without an
    /// explicit destination go here.
    return_address: Option<SocketAddr>,
}

impl DatagramDescriptor {
    pub fn open(ctx: &Rc<ReactorCtx>, bind_addr: SocketAddr) -> Result<Binding, SetupError> {
        let sock = UdpSock::bind(bind_addr)?;
        Ok(Self::adopt(ctx, Box::new(sock)))
    }

    /// Adopts a bound datagram socket. Broadcast sends are enabled up
    /// front so a broadcast destination does not fail with EACCES later.
    pub fn adopt(ctx: &Rc<ReactorCtx>, mut sock: Box<dyn DgramSock>) -> Binding {
        if let Err(e) = sock.set_broadcast() {
            warn!(?e, "udp: enabling broadcast failed");
        }
        register(ctx, |st| {
            Entry::Datagram(Rc::new(std::cell::RefCell::new(Self {
                st,
                sock: Some(sock),
                outbound: PageQueue::new(),
                return_address: None,
            })))
        })
    }

    pub fn outbound_data_size(&self) -> usize {
        self.outbound.bytes()
    }

    pub fn return_address(&self) -> Option<SocketAddr> {
        self.return_address
    }

    pub fn set_callback_unbind(&mut self, on: bool) {
        self.st.callback_unbind = on;
    }

    pub fn inactivity_timeout(&self) -> Micros {
        self.st.inactivity_timeout
    }

    pub fn set_inactivity_timeout(&mut self, micros: Micros) {
        self.st.inactivity_timeout = micros;
        let at = (micros > 0).then(|| self.st.last_activity + micros);
        self.st.reschedule_heartbeat(at);
    }

    /// Queues a packet for the last-seen peer.
    pub fn send_outbound_data(&mut self, data: &[u8]) -> Result<usize, ApiError> {
        let dest = self.return_address.ok_or(ApiError::NoPeer)?;
        Ok(self.enqueue(data, dest))
    }

    /// Queues a packet for an explicit destination, resolved through the
    /// reactor.
    pub fn send_outbound_datagram(
        &mut self,
        data: &[u8],
        host: &str,
        port: u16,
    ) -> Result<usize, SetupError> {
        let dest = self
            .st
            .ctx
            .reactor
            .resolve(host, port, SockKind::Dgram)
            .map_err(|source| SetupError::Resolve { host: host.to_owned(), port, source })?;
        Ok(self.enqueue(data, dest))
    }

    /// Queues a packet for a known address.
    pub fn send_to_address(&mut self, data: &[u8], dest: SocketAddr) -> usize {
        self.enqueue(data, dest)
    }

    fn enqueue(&mut self, data: &[u8], dest: SocketAddr) -> usize {
        if self.st.close_now || self.st.close_after_writing || self.sock.is_none() {
            return 0;
        }
        self.outbound.push(OutboundPage::with_dest(data, dest));
        self.st.touch_interest();
        data.len()
    }

    /// Suppresses all readiness interest. Returns whether the state
    /// changed.
    pub fn pause(&mut self) -> bool {
        let changed = !self.st.paused;
        self.st.paused = true;
        if changed {
            self.st.touch_interest();
        }
        changed
    }

    pub fn resume(&mut self) -> bool {
        let changed = self.st.paused;
        self.st.paused = false;
        if changed {
            self.st.touch_interest();
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.st.paused
    }

    pub fn start_proxy(
        &mut self,
        target: Binding,
        high_water: usize,
        length: u64,
    ) -> Result<(), ApiError> {
        self.st.start_proxy_to(target, high_water, length)
    }

    pub fn stop_proxy(&mut self) {
        self.st.stop_proxy();
    }

    pub fn proxied_bytes(&self) -> u64 {
        self.st.proxied_bytes
    }

    pub(crate) fn feed_reply(&mut self, data: &[u8]) -> Result<usize, ApiError> {
        self.send_outbound_data(data)
    }

    pub(crate) fn begin_feed(&mut self, from: Binding, high_water: usize) -> Result<(), ApiError> {
        if self.st.proxied_from.is_some() {
            return Err(ApiError::ProxyTargetBusy);
        }
        self.st.proxied_from = Some(from);
        self.st.max_outbound_buf_size = high_water;
        Ok(())
    }

    pub(crate) fn end_feed(&mut self) {
        self.st.proxied_from = None;
        self.st.max_outbound_buf_size = 0;
    }

    pub(crate) fn clear_proxy_link(&mut self) {
        self.st.proxy_target = None;
        self.st.proxy_remaining = None;
    }

    pub(crate) fn outbound_level(&self) -> (usize, usize) {
        (self.outbound.bytes(), self.st.max_outbound_buf_size)
    }

    pub(crate) fn resume_from_backpressure(&mut self) {
        if self.st.paused {
            self.st.paused = false;
            self.st.touch_interest();
        }
    }

    fn close_hard(&mut self) {
        if let Some(sock) = self.sock.take() {
            self.st.ctx.reactor.deregister(self.st.binding);
            drop(sock);
        }
    }
}

impl Descriptor for DatagramDescriptor {
    fn binding(&self) -> Binding {
        self.st.binding
    }

    fn on_readable(&mut self) {
        if self.sock.is_none() || self.st.close_now {
            return;
        }
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..READ_ITERATIONS {
            if self.st.close_now || self.sock.is_none() {
                break;
            }
            let got = match self.sock.as_mut() {
                Some(s) => s.recv_from(&mut buf[..READ_CHUNK - 1]),
                None => break,
            };
            match got {
                Ok((n, from)) => {
                    // zero-length datagrams are real packets and dispatch
                    self.st.mark_activity();
                    self.return_address = Some(from);
                    buf[n] = 0;
                    self.st.route_inbound(&buf[..n]);
                    if self.st.paused {
                        break;
                    }
                }
                Err(e) if transient(&e) => break,
                Err(e) => {
                    debug!(binding = %self.st.binding, ?e, "udp: recv failed");
                    self.st.unbind_reason = errno_of(&e);
                    self.close_hard();
                    break;
                }
            }
        }
    }

    fn on_writable(&mut self) {
        if self.sock.is_none() || self.st.close_now {
            return;
        }
        for _ in 0..DGRAM_SEND_BURST {
            let Some(page) = self.outbound.front() else { break };
            let Some(dest) = page.dest() else {
                // a destination is stamped at enqueue time; drop the stray
                self.outbound.pop_front();
                continue;
            };
            let sent = match self.sock.as_mut() {
                Some(s) => s.send_to(page.unsent(), dest),
                None => return,
            };
            match sent {
                Ok(_) => {
                    // datagrams leave whole or not at all
                    self.outbound.pop_front();
                    self.st.mark_activity();
                }
                Err(e) if transient(&e) => break,
                Err(e) => {
                    warn!(binding = %self.st.binding, ?e, %dest, "udp: send failed");
                    self.st.unbind_reason = errno_of(&e);
                    self.close_hard();
                    return;
                }
            }
        }
        if let Some(src) = self.st.proxied_from {
            if self.st.max_outbound_buf_size > 0 &&
                self.outbound.bytes() < self.st.max_outbound_buf_size
            {
                if let Some(entry) = self.st.ctx.entry(src) {
                    entry.resume_feeder();
                }
            }
        }
        self.st.touch_interest();
    }

    fn on_error(&mut self) {
        self.st.schedule_close(false);
    }

    fn heartbeat(&mut self, now: Micros) {
        if self.st.inactivity_expired(now) {
            self.st.expire();
        }
    }

    fn select_for_read(&self) -> bool {
        self.sock.is_some() && !self.st.paused
    }

    /// Page count, not byte count: a queued zero-length packet still needs
    /// a send. (`should_delete` keeps the common byte-count rule; a lone
    /// empty packet under close-after-writing is documented slack.)
    fn select_for_write(&self) -> bool {
        self.sock.is_some() && !self.st.paused && self.outbound.pages() > 0
    }

    fn should_delete(&self) -> bool {
        self.st.should_delete(self.sock.is_some(), self.outbound.bytes())
    }

    fn schedule_close(&mut self, after_writing: bool) {
        self.st.schedule_close(after_writing);
    }

    fn unbind(&mut self) {
        self.close_hard();
        self.st.emit_unbound();
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.sock.as_ref().map(|s| s.raw_fd())
    }
}

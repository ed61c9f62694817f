//! The stream descriptor: connect, readiness-driven read/write,
//! pause/resume, watch-only notification, proxy feeding and the TLS pump.

use std::{
    io::{self, IoSlice},
    net::SocketAddr,
    os::fd::RawFd,
    rc::Rc,
};

use eventide_core::{ApiError, Binding, Event, Micros, SetupError, safe_assert};
use tracing::{debug, warn};

use crate::{
    descriptor::{Descriptor, Lifecycle, READ_CHUNK, READ_ITERATIONS, WRITE_SEGMENTS},
    page::{OutboundPage, PageQueue},
    sock::{StreamSock, TcpSock, errno_of, transient},
    sys::Keepalive,
    table::{Entry, ReactorCtx, register},
    tls::{TLS_CIPHER_CHUNK, TLS_PLAIN_CHUNK, TlsConfig, TlsPull, TlsPush, TlsSession},
};

/// Default ceiling on a pending connect, in microseconds.
const PENDING_CONNECT_TIMEOUT: Micros = 20_000_000;

/// Plaintext fed to the TLS session per chunk on the send path.
const TLS_INPUT_CHUNK: usize = TLS_PLAIN_CHUNK;

pub struct ConnectionDescriptor {
    st: Lifecycle,
    sock: Option<Box<dyn StreamSock>>,
    outbound: PageQueue,
    connect_pending: bool,
    notify_readable: bool,
    notify_writable: bool,
    tls: Option<Box<dyn TlsSession>>,
    tls_config: TlsConfig,
    tls_handshake_signaled: bool,
}

impl ConnectionDescriptor {
    /// Client mode: starts a nonblocking connect. Completion (or failure)
    /// is reported on the next writable edge through SO_ERROR; a stuck
    /// connect is bounded by the pending-connect timeout.
    pub fn connect(ctx: &Rc<ReactorCtx>, addr: SocketAddr) -> Result<Binding, SetupError> {
        let sock = TcpSock::connect(addr)?;
        Ok(Self::adopt_connecting(ctx, Box::new(sock)))
    }

    /// Server mode: adopts an already connected stream (accept path, or a
    /// scripted one under test).
    pub fn adopt(ctx: &Rc<ReactorCtx>, sock: Box<dyn StreamSock>) -> Binding {
        register(ctx, |st| Entry::Connection(Self::cell(st, sock, false)))
    }

    /// Adopts a stream whose connect is still in flight. The next writable
    /// edge settles it through SO_ERROR, like [`Self::connect`].
    pub fn adopt_connecting(ctx: &Rc<ReactorCtx>, sock: Box<dyn StreamSock>) -> Binding {
        let binding = register(ctx, |mut st| {
            st.pending_connect_timeout = PENDING_CONNECT_TIMEOUT;
            Entry::Connection(Self::cell(st, sock, true))
        });
        if let Some(conn) = ctx.connection(binding) {
            let mut conn = conn.borrow_mut();
            let at = conn.heartbeat_deadline();
            conn.st.reschedule_heartbeat(at);
        }
        binding
    }

    /// Adopts a foreign fd. The fd is configured nonblocking + CLOEXEC but
    /// never closed by the core.
    pub fn attach(ctx: &Rc<ReactorCtx>, fd: RawFd) -> Result<Binding, SetupError> {
        let sock = TcpSock::attach(fd)?;
        Ok(register(ctx, |mut st| {
            st.attached = true;
            Entry::Connection(Self::cell(st, Box::new(sock), false))
        }))
    }

    /// Watch-only mode over a foreign fd: readiness is reported through
    /// notify events, the byte stream stays with the caller.
    pub fn watch(ctx: &Rc<ReactorCtx>, fd: RawFd) -> Result<Binding, SetupError> {
        let sock = TcpSock::attach(fd)?;
        Ok(register(ctx, |mut st| {
            st.attached = true;
            st.watch_only = true;
            Entry::Connection(Self::cell(st, Box::new(sock), false))
        }))
    }

    fn cell(
        st: Lifecycle,
        sock: Box<dyn StreamSock>,
        connect_pending: bool,
    ) -> Rc<std::cell::RefCell<Self>> {
        Rc::new(std::cell::RefCell::new(Self {
            st,
            sock: Some(sock),
            outbound: PageQueue::new(),
            connect_pending,
            notify_readable: false,
            notify_writable: false,
            tls: None,
            tls_config: TlsConfig::default(),
            tls_handshake_signaled: false,
        }))
    }

    pub fn outbound_data_size(&self) -> usize {
        self.outbound.bytes()
    }

    pub fn proxied_bytes(&self) -> u64 {
        self.st.proxied_bytes
    }

    pub fn is_paused(&self) -> bool {
        self.st.paused
    }

    pub fn is_watch_only(&self) -> bool {
        self.st.watch_only
    }

    pub fn is_attached(&self) -> bool {
        self.st.attached
    }

    pub fn connect_pending(&self) -> bool {
        self.connect_pending
    }

    pub fn set_callback_unbind(&mut self, on: bool) {
        self.st.callback_unbind = on;
    }

    pub fn inactivity_timeout(&self) -> Micros {
        self.st.inactivity_timeout
    }

    pub fn set_inactivity_timeout(&mut self, micros: Micros) {
        self.st.inactivity_timeout = micros;
        let at = self.heartbeat_deadline();
        self.st.reschedule_heartbeat(at);
    }

    pub fn pending_connect_timeout(&self) -> Micros {
        self.st.pending_connect_timeout
    }

    pub fn set_pending_connect_timeout(&mut self, micros: Micros) {
        self.st.pending_connect_timeout = micros;
        let at = self.heartbeat_deadline();
        self.st.reschedule_heartbeat(at);
    }

    /// Queues bytes for transmission. Over TLS the bytes pass through the
    /// session first and the return value is the plaintext actually
    /// absorbed; in the clear it is simply `data.len()`. A descriptor
    /// that is closing accepts nothing and reports 0.
    pub fn send_outbound_data(&mut self, data: &[u8]) -> Result<usize, ApiError> {
        if self.st.watch_only {
            return Err(ApiError::WatchOnly);
        }
        if self.sock.is_none() || self.st.close_now || self.st.close_after_writing {
            return Ok(0);
        }
        if self.tls.is_some() { Ok(self.send_tls(data)) } else { Ok(self.send_raw(data)) }
    }

    /// Enqueues raw bytes, bypassing TLS. Ciphertext and proxy traffic
    /// land here.
    pub(crate) fn send_raw(&mut self, data: &[u8]) -> usize {
        if self.st.close_now || self.st.close_after_writing {
            return 0;
        }
        self.outbound.push(OutboundPage::new(data));
        self.st.touch_interest();
        data.len()
    }

    /// Suppresses all readiness interest. Returns whether the state
    /// actually changed.
    pub fn pause(&mut self) -> Result<bool, ApiError> {
        if self.st.watch_only {
            return Err(ApiError::WatchOnly);
        }
        let changed = !self.st.paused;
        self.st.paused = true;
        if changed {
            self.st.touch_interest();
        }
        Ok(changed)
    }

    pub fn resume(&mut self) -> Result<bool, ApiError> {
        if self.st.watch_only {
            return Err(ApiError::WatchOnly);
        }
        let changed = self.st.paused;
        self.st.paused = false;
        if changed {
            self.st.touch_interest();
        }
        Ok(changed)
    }

    pub fn set_notify_readable(&mut self, on: bool) -> Result<(), ApiError> {
        if !self.st.watch_only {
            return Err(ApiError::NotWatchOnly);
        }
        self.notify_readable = on;
        self.st.touch_interest();
        Ok(())
    }

    pub fn set_notify_writable(&mut self, on: bool) -> Result<(), ApiError> {
        if !self.st.watch_only {
            return Err(ApiError::NotWatchOnly);
        }
        self.notify_writable = on;
        self.st.touch_interest();
        Ok(())
    }

    pub fn notify_readable(&self) -> bool {
        self.notify_readable
    }

    pub fn notify_writable(&self) -> bool {
        self.notify_writable
    }

    /// Stops tracking an attached fd and returns it to the caller. The fd
    /// stays open; the descriptor is retired on the next sweep.
    pub fn detach(&mut self) -> Result<RawFd, ApiError> {
        if !self.st.attached {
            return Err(ApiError::WrongKind);
        }
        let fd = self.sock.as_ref().map(|s| s.raw_fd()).ok_or(ApiError::Closed)?;
        self.st.schedule_close(false);
        Ok(fd)
    }

    pub fn enable_keepalive(&mut self, idle_secs: i32, interval_secs: i32, count: i32) -> io::Result<()> {
        let cfg = Keepalive { idle_secs, interval_secs, count };
        match self.sock.as_mut() {
            Some(s) => s.set_keepalive(Some(&cfg)),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    pub fn disable_keepalive(&mut self) -> io::Result<()> {
        match self.sock.as_mut() {
            Some(s) => s.set_keepalive(None),
            None => Err(io::Error::from_raw_os_error(libc::EBADF)),
        }
    }

    /// Binds this descriptor's inbound stream to `target`'s outbound
    /// queue. With `length > 0` the link completes after exactly that many
    /// bytes; `bufsize` is the target-queue high-water mark that pauses
    /// this feeder.
    pub fn start_proxy(
        &mut self,
        target: Binding,
        high_water: usize,
        length: u64,
    ) -> Result<(), ApiError> {
        if self.st.watch_only {
            return Err(ApiError::WatchOnly);
        }
        self.st.start_proxy_to(target, high_water, length)
    }

    pub fn stop_proxy(&mut self) {
        self.st.stop_proxy();
    }

    pub(crate) fn begin_feed(&mut self, from: Binding, high_water: usize) -> Result<(), ApiError> {
        if self.st.watch_only {
            return Err(ApiError::WrongKind);
        }
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
        if self.st.paused && !self.st.watch_only {
            self.st.paused = false;
            self.st.touch_interest();
        }
    }

    /// Fixes TLS parameters ahead of `start_tls`. Fails once the session
    /// exists.
    pub fn set_tls_config(&mut self, config: TlsConfig) -> Result<(), ApiError> {
        if self.tls.is_some() {
            return Err(ApiError::TlsStarted);
        }
        self.tls_config = config;
        Ok(())
    }

    pub fn tls_config(&self) -> &TlsConfig {
        &self.tls_config
    }

    /// Overlays a TLS session on the stream. Any ciphertext the session
    /// wants to open with (a ClientHello, typically) is flushed right
    /// away.
    pub fn start_tls(&mut self, session: Box<dyn TlsSession>) -> Result<(), ApiError> {
        if self.st.watch_only {
            return Err(ApiError::WatchOnly);
        }
        if self.tls.is_some() {
            return Err(ApiError::TlsStarted);
        }
        self.tls = Some(session);
        self.pump_ciphertext();
        Ok(())
    }

    pub fn tls_started(&self) -> bool {
        self.tls.is_some()
    }

    pub fn handshake_completed(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.handshake_completed())
    }

    pub fn peer_cert(&self) -> Option<Vec<u8>> {
        self.tls.as_ref().and_then(|t| t.peer_cert())
    }

    pub fn cipher_name(&self) -> Option<String> {
        self.tls.as_ref().and_then(|t| t.cipher_name())
    }

    pub fn cipher_bits(&self) -> Option<u32> {
        self.tls.as_ref().and_then(|t| t.cipher_bits())
    }

    pub fn cipher_protocol(&self) -> Option<String> {
        self.tls.as_ref().and_then(|t| t.cipher_protocol())
    }

    pub fn sni_hostname(&self) -> Option<String> {
        self.tls.as_ref().and_then(|t| t.sni_hostname())
    }

    fn heartbeat_deadline(&self) -> Option<Micros> {
        if self.connect_pending && self.st.pending_connect_timeout > 0 {
            Some(self.st.created_at + self.st.pending_connect_timeout)
        } else if self.st.inactivity_timeout > 0 {
            Some(self.st.last_activity + self.st.inactivity_timeout)
        } else {
            None
        }
    }

    /// Releases the socket: deregister, half-close, drop (close unless
    /// attached or a std handle). Idempotent.
    fn close_hard(&mut self) {
        if let Some(mut sock) = self.sock.take() {
            self.st.ctx.reactor.deregister(self.st.binding);
            sock.shutdown_write();
            drop(sock);
        }
    }

    /// Inbound bytes straight off the socket: through the TLS session if
    /// one is attached, otherwise to the proxy/read routing.
    fn dispatch_inbound(&mut self, data: &[u8]) {
        if self.tls.is_none() {
            self.st.route_inbound(data);
            return;
        }
        if let Some(t) = self.tls.as_mut() {
            t.put_ciphertext(data);
        }
        let mut plain = [0u8; TLS_PLAIN_CHUNK + 1];
        loop {
            let pull = match self.tls.as_mut() {
                Some(t) => t.get_plaintext(&mut plain[..TLS_PLAIN_CHUNK]),
                None => break,
            };
            match pull {
                TlsPull::Data(n) => {
                    if n == 0 {
                        break;
                    }
                    self.note_handshake();
                    plain[n] = 0;
                    self.st.route_inbound(&plain[..n]);
                }
                TlsPull::WouldBlock => {
                    self.note_handshake();
                    break;
                }
                TlsPull::Verify => {
                    let cert =
                        self.tls.as_ref().and_then(|t| t.peer_cert()).unwrap_or_default();
                    let ok = self.st.ctx.sink.verify_peer(self.st.binding, &cert);
                    if let Some(t) = self.tls.as_mut() {
                        t.resolve_verify(ok);
                    }
                }
                TlsPull::AbortPending => {
                    // let the close alert reach the wire before we go
                    self.pump_ciphertext();
                    self.st.schedule_close(true);
                    break;
                }
                TlsPull::Fatal => {
                    warn!(binding = %self.st.binding, "tls: fatal on inbound");
                    self.st.unbind_reason = libc::EPROTO;
                    self.st.schedule_close(false);
                    break;
                }
            }
        }
        // handshake responses and renegotiation records
        self.pump_ciphertext();
    }

    fn note_handshake(&mut self) {
        if self.tls_handshake_signaled {
            return;
        }
        if self.tls.as_ref().is_some_and(|t| t.handshake_completed()) {
            self.tls_handshake_signaled = true;
            self.st.deliver(Event::TlsHandshakeCompleted);
        }
    }

    fn send_tls(&mut self, data: &[u8]) -> usize {
        let mut accepted = 0;
        for chunk in data.chunks(TLS_INPUT_CHUNK) {
            let pushed = match self.tls.as_mut() {
                Some(t) => t.put_plaintext(chunk),
                None => break,
            };
            match pushed {
                TlsPush::Accepted(n) => accepted += n,
                TlsPush::WouldBlock => break,
                TlsPush::Fatal => {
                    warn!(binding = %self.st.binding, "tls: fatal on outbound");
                    self.st.unbind_reason = libc::EPROTO;
                    self.st.schedule_close(false);
                    return accepted;
                }
            }
            self.pump_ciphertext();
        }
        self.pump_ciphertext();
        accepted
    }

    /// Drains pending ciphertext into the raw outbound queue and pumps the
    /// session's internal buffers until neither makes progress.
    fn pump_ciphertext(&mut self) {
        let mut buf = [0u8; TLS_CIPHER_CHUNK];
        loop {
            let mut progress = false;
            loop {
                if !self.tls.as_ref().is_some_and(|t| t.can_get_ciphertext()) {
                    break;
                }
                let n = match self.tls.as_mut() {
                    Some(t) => t.get_ciphertext(&mut buf),
                    None => 0,
                };
                if n == 0 {
                    break;
                }
                self.send_raw(&buf[..n]);
                progress = true;
            }
            let pumped = match self.tls.as_mut() {
                Some(t) => t.put_plaintext(&[]),
                None => return,
            };
            match pumped {
                TlsPush::Accepted(n) if n > 0 => progress = true,
                TlsPush::Accepted(_) | TlsPush::WouldBlock => {}
                TlsPush::Fatal => {
                    warn!(binding = %self.st.binding, "tls: fatal while pumping");
                    self.st.unbind_reason = libc::EPROTO;
                    self.st.schedule_close(false);
                    return;
                }
            }
            if !progress {
                break;
            }
        }
    }

    fn finish_connect(&mut self) {
        let err = match self.sock.as_mut() {
            Some(s) => s.take_error(),
            None => return,
        };
        match err {
            Ok(0) => {
                self.connect_pending = false;
                self.st.mark_activity();
                let at = self.heartbeat_deadline();
                self.st.reschedule_heartbeat(at);
                self.st.deliver(Event::Completed);
                self.st.touch_interest();
            }
            Ok(code) => {
                debug!(binding = %self.st.binding, code, "conn: connect refused");
                self.st.unbind_reason = code;
                self.st.schedule_close(false);
            }
            Err(e) => {
                self.st.unbind_reason = errno_of(&e);
                self.st.schedule_close(false);
            }
        }
    }

    fn write_outbound(&mut self) {
        if self.outbound.bytes() == 0 {
            // writable interest raced with a drain; nothing to do
            return;
        }
        let slices: Vec<IoSlice<'_>> = self
            .outbound
            .iter()
            .filter(|p| p.remaining() > 0)
            .take(WRITE_SEGMENTS)
            .map(|p| IoSlice::new(p.unsent()))
            .collect();
        safe_assert!(!slices.is_empty(), "queued bytes but nothing to write");
        let wrote = match self.sock.as_mut() {
            Some(s) => s.write_vectored(&slices),
            None => return,
        };
        drop(slices);
        match wrote {
            Ok(0) => {}
            Ok(n) => {
                self.outbound.consume(n);
                self.st.mark_activity();
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
            Err(e) if transient(&e) => {}
            Err(e) => {
                warn!(binding = %self.st.binding, ?e, "conn: write failed");
                self.st.unbind_reason = errno_of(&e);
                self.close_hard();
            }
        }
    }
}

impl Descriptor for ConnectionDescriptor {
    fn binding(&self) -> Binding {
        self.st.binding
    }

    fn on_readable(&mut self) {
        if self.sock.is_none() || self.st.close_now {
            // a last readiness edge may land after the close; drop it
            return;
        }
        if self.st.watch_only {
            if self.notify_readable {
                self.st.deliver(Event::NotifyReadable);
            }
            return;
        }
        self.st.mark_activity();
        let mut buf = [0u8; READ_CHUNK];
        for _ in 0..READ_ITERATIONS {
            if self.st.close_now || self.sock.is_none() {
                break;
            }
            let got = match self.sock.as_mut() {
                Some(s) => s.read(&mut buf[..READ_CHUNK - 1]),
                None => break,
            };
            match got {
                Ok(0) => {
                    // graceful close from the peer
                    self.st.schedule_close(false);
                    break;
                }
                Ok(n) => {
                    buf[n] = 0; // guard NUL, one past the payload
                    self.dispatch_inbound(&buf[..n]);
                    if self.st.paused {
                        break;
                    }
                }
                Err(e) if transient(&e) => break,
                Err(e) => {
                    debug!(binding = %self.st.binding, ?e, "conn: read failed");
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
        if self.connect_pending {
            self.finish_connect();
            return;
        }
        if self.st.watch_only {
            if self.notify_writable {
                self.st.deliver(Event::NotifyWritable);
            }
            self.st.touch_interest();
            return;
        }
        self.write_outbound();
    }

    fn on_error(&mut self) {
        if self.st.watch_only {
            // some pollers collapse HUP/ERR into a bare error; surface it
            // as readiness so the owner of the fd can look at it
            if self.notify_readable {
                self.st.deliver(Event::NotifyReadable);
            }
            if self.notify_writable {
                self.st.deliver(Event::NotifyWritable);
            }
            return;
        }
        self.st.schedule_close(false);
    }

    fn heartbeat(&mut self, now: Micros) {
        if self.connect_pending {
            if self.st.pending_connect_timeout > 0 &&
                now.saturating_sub(self.st.created_at) >= self.st.pending_connect_timeout
            {
                self.st.expire();
            }
        } else if self.st.inactivity_expired(now) {
            self.st.expire();
        }
    }

    fn select_for_read(&self) -> bool {
        if self.sock.is_none() || self.st.paused || self.connect_pending {
            false
        } else if self.st.watch_only {
            self.notify_readable
        } else {
            true
        }
    }

    fn select_for_write(&self) -> bool {
        if self.sock.is_none() || self.st.paused {
            false
        } else if self.connect_pending {
            true
        } else if self.st.watch_only {
            self.notify_writable
        } else {
            self.outbound.bytes() > 0
        }
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

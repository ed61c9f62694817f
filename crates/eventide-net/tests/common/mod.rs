//! Shared scaffolding for the scenario tests: a recording reactor, a
//! recording sink, and scripted socket/TLS implementations.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io::{self, IoSlice},
    net::SocketAddr,
    os::fd::RawFd,
    rc::Rc,
};

use eventide_core::{Binding, Event, EventSink, Micros, Reactor, SockKind};
use eventide_net::{
    Descriptor, DgramSock, Keepalive, ListenSock, ReactorCtx, StreamSock, TlsPull, TlsPush,
    TlsSession,
};

// ---------------------------------------------------------------- reactor

#[derive(Default)]
pub struct ReactorState {
    pub now: Cell<Micros>,
    pub quantum: Cell<Micros>,
    pub accept_burst: Cell<usize>,
    pub adds: RefCell<Vec<Binding>>,
    pub modifies: RefCell<Vec<Binding>>,
    pub deregisters: RefCell<Vec<Binding>>,
    pub queued_heartbeats: RefCell<Vec<(Binding, Micros)>>,
    pub cleared_heartbeats: RefCell<Vec<(Binding, Micros)>>,
    pub closes_scheduled: Cell<i64>,
    pub closes_finished: Cell<i64>,
    pub loopbreak_reads: Cell<usize>,
    pub watch_reads: Cell<usize>,
    pub resolve_to: RefCell<Option<SocketAddr>>,
    pub resolved: RefCell<Vec<(String, u16, SockKind)>>,
}

pub struct MockReactor(pub Rc<ReactorState>);

impl Reactor for MockReactor {
    fn add(&self, binding: Binding) {
        self.0.adds.borrow_mut().push(binding);
    }

    fn modify(&self, binding: Binding) {
        self.0.modifies.borrow_mut().push(binding);
    }

    fn deregister(&self, binding: Binding) {
        self.0.deregisters.borrow_mut().push(binding);
    }

    fn queue_heartbeat(&self, binding: Binding, at: Micros) {
        self.0.queued_heartbeats.borrow_mut().push((binding, at));
    }

    fn clear_heartbeat(&self, at: Micros, binding: Binding) {
        self.0.cleared_heartbeats.borrow_mut().push((binding, at));
    }

    fn loop_time(&self) -> Micros {
        self.0.now.get()
    }

    fn real_time(&self) -> Micros {
        self.0.now.get()
    }

    fn timer_quantum(&self) -> Micros {
        self.0.quantum.get()
    }

    fn resolve(&self, host: &str, port: u16, kind: SockKind) -> io::Result<SocketAddr> {
        self.0.resolved.borrow_mut().push((host.to_owned(), port, kind));
        match *self.0.resolve_to.borrow() {
            Some(addr) => Ok(addr),
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    fn simultaneous_accept_count(&self) -> usize {
        self.0.accept_burst.get()
    }

    fn close_scheduled(&self) {
        self.0.closes_scheduled.set(self.0.closes_scheduled.get() + 1);
    }

    fn close_finished(&self) {
        self.0.closes_finished.set(self.0.closes_finished.get() + 1);
    }

    fn read_loop_breaker(&self) {
        self.0.loopbreak_reads.set(self.0.loopbreak_reads.get() + 1);
    }

    fn read_watch_events(&self) {
        self.0.watch_reads.set(self.0.watch_reads.get() + 1);
    }
}

// ------------------------------------------------------------------ sink

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Read(Vec<u8>),
    Completed,
    Accepted(Binding),
    Unbound(i32),
    NotifyReadable,
    NotifyWritable,
    ProxyTargetUnbound,
    ProxyCompleted,
    TlsHandshakeCompleted,
}

#[derive(Default)]
pub struct SinkState {
    pub events: RefCell<Vec<(Binding, Recorded)>>,
    pub verify_answer: Cell<bool>,
    pub verify_calls: RefCell<Vec<(Binding, Vec<u8>)>>,
}

impl SinkState {
    pub fn events_for(&self, binding: Binding) -> Vec<Recorded> {
        self.events
            .borrow()
            .iter()
            .filter(|(b, _)| *b == binding)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn reads_for(&self, binding: Binding) -> Vec<Vec<u8>> {
        self.events_for(binding)
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Read(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn unbound_for(&self, binding: Binding) -> Vec<i32> {
        self.events_for(binding)
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Unbound(code) => Some(code),
                _ => None,
            })
            .collect()
    }
}

pub struct RecordingSink(pub Rc<SinkState>);

impl EventSink for RecordingSink {
    fn deliver(&self, binding: Binding, event: Event<'_>) {
        let owned = match event {
            Event::Read(d) => Recorded::Read(d.to_vec()),
            Event::Completed => Recorded::Completed,
            Event::Accepted(b) => Recorded::Accepted(b),
            Event::Unbound(code) => Recorded::Unbound(code),
            Event::NotifyReadable => Recorded::NotifyReadable,
            Event::NotifyWritable => Recorded::NotifyWritable,
            Event::ProxyTargetUnbound => Recorded::ProxyTargetUnbound,
            Event::ProxyCompleted => Recorded::ProxyCompleted,
            Event::TlsHandshakeCompleted => Recorded::TlsHandshakeCompleted,
        };
        self.0.events.borrow_mut().push((binding, owned));
    }

    fn verify_peer(&self, binding: Binding, cert: &[u8]) -> bool {
        self.0.verify_calls.borrow_mut().push((binding, cert.to_vec()));
        self.0.verify_answer.get()
    }
}

// --------------------------------------------------------------- harness

pub struct Harness {
    pub ctx: Rc<ReactorCtx>,
    pub reactor: Rc<ReactorState>,
    pub sink: Rc<SinkState>,
}

pub fn harness() -> Harness {
    let reactor = Rc::new(ReactorState::default());
    reactor.now.set(1_000_000);
    reactor.accept_burst.set(10);
    let sink = Rc::new(SinkState::default());
    let ctx = ReactorCtx::new(
        Box::new(MockReactor(reactor.clone())),
        Box::new(RecordingSink(sink.clone())),
    );
    Harness { ctx, reactor, sink }
}

impl Harness {
    pub fn readable(&self, binding: Binding) {
        let d = self.ctx.descriptor(binding).expect("binding gone");
        d.borrow_mut().on_readable();
    }

    pub fn writable(&self, binding: Binding) {
        let d = self.ctx.descriptor(binding).expect("binding gone");
        d.borrow_mut().on_writable();
    }

    pub fn error(&self, binding: Binding) {
        let d = self.ctx.descriptor(binding).expect("binding gone");
        d.borrow_mut().on_error();
    }

    pub fn heartbeat(&self, binding: Binding, now: Micros) {
        self.reactor.now.set(now);
        self.ctx.run_heartbeat(binding, now);
    }

    pub fn should_delete(&self, binding: Binding) -> bool {
        self.ctx
            .descriptor(binding)
            .is_some_and(|d| d.borrow().should_delete())
    }

    pub fn sweep(&self) -> usize {
        self.ctx.sweep()
    }
}

// -------------------------------------------------------- scripted stream

pub enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Err(i32),
}

#[derive(Default)]
pub struct StreamState {
    pub reads: RefCell<VecDeque<ReadStep>>,
    pub written: RefCell<Vec<u8>>,
    /// Per-call write ceiling; 0 stalls the socket with EAGAIN.
    pub write_cap: Cell<usize>,
    pub write_err: RefCell<Option<i32>>,
    pub so_error: Cell<i32>,
    pub shutdowns: Cell<usize>,
    pub nodelay: Cell<Option<bool>>,
    pub keepalive: RefCell<Option<Option<Keepalive>>>,
    pub dropped: Cell<bool>,
}

impl StreamState {
    pub fn new() -> Rc<Self> {
        let s = Rc::new(Self::default());
        s.write_cap.set(usize::MAX);
        s
    }

    pub fn push_read(&self, data: &[u8]) {
        self.reads.borrow_mut().push_back(ReadStep::Data(data.to_vec()));
    }

    pub fn push_eof(&self) {
        self.reads.borrow_mut().push_back(ReadStep::Eof);
    }

    pub fn push_read_err(&self, code: i32) {
        self.reads.borrow_mut().push_back(ReadStep::Err(code));
    }
}

pub struct ScriptedSock(pub Rc<StreamState>);

impl StreamSock for ScriptedSock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let step = self.0.reads.borrow_mut().pop_front();
        match step {
            None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Err(code)) => Err(io::Error::from_raw_os_error(code)),
            Some(ReadStep::Data(d)) => {
                let n = d.len().min(buf.len());
                buf[..n].copy_from_slice(&d[..n]);
                if n < d.len() {
                    self.0.reads.borrow_mut().push_front(ReadStep::Data(d[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        if let Some(code) = self.0.write_err.borrow_mut().take() {
            return Err(io::Error::from_raw_os_error(code));
        }
        let cap = self.0.write_cap.get();
        if cap == 0 {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        let mut wrote = 0;
        let mut out = self.0.written.borrow_mut();
        'bufs: for b in bufs {
            for &byte in b.iter() {
                if wrote == cap {
                    break 'bufs;
                }
                out.push(byte);
                wrote += 1;
            }
        }
        Ok(wrote)
    }

    fn take_error(&mut self) -> io::Result<i32> {
        Ok(self.0.so_error.get())
    }

    fn shutdown_write(&mut self) {
        self.0.shutdowns.set(self.0.shutdowns.get() + 1);
    }

    fn set_nodelay(&mut self, on: bool) -> io::Result<()> {
        self.0.nodelay.set(Some(on));
        Ok(())
    }

    fn set_keepalive(&mut self, cfg: Option<&Keepalive>) -> io::Result<()> {
        *self.0.keepalive.borrow_mut() = Some(cfg.copied());
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        99
    }
}

impl Drop for ScriptedSock {
    fn drop(&mut self) {
        self.0.dropped.set(true);
    }
}

// ------------------------------------------------------- scripted listener

#[derive(Default)]
pub struct ListenState {
    pub pending: RefCell<VecDeque<(Rc<StreamState>, SocketAddr)>>,
    pub accept_err: RefCell<Option<i32>>,
}

impl ListenState {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn push_conn(&self, state: Rc<StreamState>, peer: SocketAddr) {
        self.pending.borrow_mut().push_back((state, peer));
    }
}

pub struct ScriptedListener(pub Rc<ListenState>);

impl ListenSock for ScriptedListener {
    fn accept(&mut self) -> io::Result<(Box<dyn StreamSock>, SocketAddr)> {
        if let Some(code) = self.0.accept_err.borrow_mut().take() {
            return Err(io::Error::from_raw_os_error(code));
        }
        match self.0.pending.borrow_mut().pop_front() {
            Some((state, peer)) => Ok((Box::new(ScriptedSock(state)) as Box<dyn StreamSock>, peer)),
            None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
        }
    }

    fn raw_fd(&self) -> RawFd {
        98
    }
}

// ------------------------------------------------------- scripted datagram

#[derive(Default)]
pub struct DgramState {
    pub reads: RefCell<VecDeque<(Vec<u8>, SocketAddr)>>,
    pub read_err: RefCell<Option<i32>>,
    pub sent: RefCell<Vec<(Vec<u8>, SocketAddr)>>,
    pub send_err: RefCell<Option<i32>>,
    pub broadcast: Cell<bool>,
}

impl DgramState {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn push_packet(&self, data: &[u8], from: SocketAddr) {
        self.reads.borrow_mut().push_back((data.to_vec(), from));
    }
}

pub struct ScriptedDgram(pub Rc<DgramState>);

impl DgramSock for ScriptedDgram {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        if let Some(code) = self.0.read_err.borrow_mut().take() {
            return Err(io::Error::from_raw_os_error(code));
        }
        match self.0.reads.borrow_mut().pop_front() {
            Some((d, from)) => {
                let n = d.len().min(buf.len());
                buf[..n].copy_from_slice(&d[..n]);
                Ok((n, from))
            }
            None => Err(io::Error::from_raw_os_error(libc::EAGAIN)),
        }
    }

    fn send_to(&mut self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        if let Some(code) = self.0.send_err.borrow_mut().take() {
            return Err(io::Error::from_raw_os_error(code));
        }
        self.0.sent.borrow_mut().push((buf.to_vec(), dest));
        Ok(buf.len())
    }

    fn set_broadcast(&mut self) -> io::Result<()> {
        self.0.broadcast.set(true);
        Ok(())
    }

    fn raw_fd(&self) -> RawFd {
        97
    }
}

// ----------------------------------------------------------- scripted tls

pub enum PullStep {
    Data(Vec<u8>),
    Verify,
    AbortPending,
    Fatal,
}

#[derive(Default)]
pub struct TlsState {
    pub ciphertext_in: RefCell<Vec<u8>>,
    pub pulls: RefCell<VecDeque<PullStep>>,
    pub cipher_out: RefCell<VecDeque<Vec<u8>>>,
    pub plain_accepted: RefCell<Vec<u8>>,
    pub push_fatal: Cell<bool>,
    pub handshake_done: Cell<bool>,
    /// Flip `handshake_done` as soon as ciphertext arrives, like a server
    /// finishing on the peer's final flight.
    pub complete_on_put: Cell<bool>,
    pub verify_decision: Cell<Option<bool>>,
    pub cert: RefCell<Option<Vec<u8>>>,
}

impl TlsState {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

pub struct ScriptedTls(pub Rc<TlsState>);

impl TlsSession for ScriptedTls {
    fn put_ciphertext(&mut self, data: &[u8]) {
        self.0.ciphertext_in.borrow_mut().extend_from_slice(data);
        if self.0.complete_on_put.get() {
            self.0.handshake_done.set(true);
        }
    }

    fn get_plaintext(&mut self, buf: &mut [u8]) -> TlsPull {
        let step = self.0.pulls.borrow_mut().pop_front();
        match step {
            None => TlsPull::WouldBlock,
            Some(PullStep::Verify) => TlsPull::Verify,
            Some(PullStep::AbortPending) => TlsPull::AbortPending,
            Some(PullStep::Fatal) => TlsPull::Fatal,
            Some(PullStep::Data(d)) => {
                let n = d.len().min(buf.len());
                buf[..n].copy_from_slice(&d[..n]);
                if n < d.len() {
                    self.0.pulls.borrow_mut().push_front(PullStep::Data(d[n..].to_vec()));
                }
                TlsPull::Data(n)
            }
        }
    }

    fn put_plaintext(&mut self, data: &[u8]) -> TlsPush {
        if self.0.push_fatal.get() {
            return TlsPush::Fatal;
        }
        self.0.plain_accepted.borrow_mut().extend_from_slice(data);
        TlsPush::Accepted(data.len())
    }

    fn get_ciphertext(&mut self, buf: &mut [u8]) -> usize {
        match self.0.cipher_out.borrow_mut().pop_front() {
            Some(d) => {
                let n = d.len().min(buf.len());
                buf[..n].copy_from_slice(&d[..n]);
                if n < d.len() {
                    self.0.cipher_out.borrow_mut().push_front(d[n..].to_vec());
                }
                n
            }
            None => 0,
        }
    }

    fn can_get_ciphertext(&self) -> bool {
        !self.0.cipher_out.borrow().is_empty()
    }

    fn handshake_completed(&self) -> bool {
        self.0.handshake_done.get()
    }

    fn resolve_verify(&mut self, accepted: bool) {
        self.0.verify_decision.set(Some(accepted));
        if !accepted {
            self.0.pulls.borrow_mut().push_front(PullStep::Fatal);
        }
    }

    fn peer_cert(&self) -> Option<Vec<u8>> {
        self.0.cert.borrow().clone()
    }

    fn cipher_name(&self) -> Option<String> {
        Some("TLS_AES_128_GCM_SHA256".to_owned())
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

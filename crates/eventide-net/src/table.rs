//! The binding registry: opaque handles to live descriptors, and the
//! shared context every descriptor holds.

use std::{cell::RefCell, collections::HashMap, os::fd::RawFd, rc::Rc};

use eventide_core::{ApiError, Binding, EventSink, Micros, Reactor};

use crate::{
    acceptor::AcceptorDescriptor,
    connection::ConnectionDescriptor,
    control::{LoopbreakDescriptor, WatchDescriptor},
    datagram::DatagramDescriptor,
    descriptor::{Descriptor, Lifecycle},
};

/// A registered descriptor, tagged by kind. Typed lookups replace the
/// runtime downcasts a virtual hierarchy would need.
#[derive(Clone)]
pub enum Entry {
    Connection(Rc<RefCell<ConnectionDescriptor>>),
    Acceptor(Rc<RefCell<AcceptorDescriptor>>),
    Datagram(Rc<RefCell<DatagramDescriptor>>),
    Loopbreak(Rc<RefCell<LoopbreakDescriptor>>),
    Watch(Rc<RefCell<WatchDescriptor>>),
}

impl Entry {
    /// The kind-independent capability set the reactor drives.
    pub fn as_descriptor(&self) -> Rc<RefCell<dyn Descriptor>> {
        match self {
            Entry::Connection(d) => d.clone(),
            Entry::Acceptor(d) => d.clone(),
            Entry::Datagram(d) => d.clone(),
            Entry::Loopbreak(d) => d.clone(),
            Entry::Watch(d) => d.clone(),
        }
    }

    /// Proxy traffic lands here: streams enqueue (through TLS when
    /// attached), datagrams reply to their last peer.
    pub(crate) fn feed_bytes(&self, data: &[u8]) -> Result<usize, ApiError> {
        match self {
            Entry::Connection(d) => d.borrow_mut().send_outbound_data(data),
            Entry::Datagram(d) => d.borrow_mut().feed_reply(data),
            _ => Err(ApiError::WrongKind),
        }
    }

    /// Claims this descriptor as a proxy target. At most one feeder at a
    /// time.
    pub(crate) fn begin_feed(&self, from: Binding, high_water: usize) -> Result<(), ApiError> {
        match self {
            Entry::Connection(d) => d.borrow_mut().begin_feed(from, high_water),
            Entry::Datagram(d) => d.borrow_mut().begin_feed(from, high_water),
            _ => Err(ApiError::WrongKind),
        }
    }

    pub(crate) fn end_feed(&self) {
        match self {
            Entry::Connection(d) => d.borrow_mut().end_feed(),
            Entry::Datagram(d) => d.borrow_mut().end_feed(),
            _ => {}
        }
    }

    /// Severs the partner's outgoing link when a target dies.
    pub(crate) fn clear_proxy_target(&self) {
        match self {
            Entry::Connection(d) => d.borrow_mut().clear_proxy_link(),
            Entry::Datagram(d) => d.borrow_mut().clear_proxy_link(),
            _ => {}
        }
    }

    /// (queued bytes, high-water mark) of a proxy target's outbound queue.
    pub(crate) fn outbound_level(&self) -> (usize, usize) {
        match self {
            Entry::Connection(d) => d.borrow().outbound_level(),
            Entry::Datagram(d) => d.borrow().outbound_level(),
            _ => (0, 0),
        }
    }

    /// Un-pauses a feeder once the target drained below its high-water
    /// mark.
    pub(crate) fn resume_feeder(&self) {
        match self {
            Entry::Connection(d) => d.borrow_mut().resume_from_backpressure(),
            Entry::Datagram(d) => d.borrow_mut().resume_from_backpressure(),
            _ => {}
        }
    }
}

/// Binding → descriptor map. Bindings are never reused.
#[derive(Default)]
pub struct BindingTable {
    next: u64,
    map: HashMap<u64, Entry>,
}

impl BindingTable {
    pub fn reserve(&mut self) -> Binding {
        self.next += 1;
        Binding(self.next)
    }

    pub fn install(&mut self, binding: Binding, entry: Entry) {
        let prior = self.map.insert(binding.0, entry);
        eventide_core::safe_assert!(prior.is_none(), "binding {binding} installed twice");
    }

    pub fn get(&self, binding: Binding) -> Option<Entry> {
        self.map.get(&binding.0).cloned()
    }

    pub fn take(&mut self, binding: Binding) -> Option<Entry> {
        self.map.remove(&binding.0)
    }

    pub fn bindings(&self) -> Vec<Binding> {
        let mut all: Vec<Binding> = self.map.keys().map(|k| Binding(*k)).collect();
        all.sort_unstable();
        all
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Everything a descriptor shares with its reactor: the poller/timer
/// collaborator, the callback channel, and the binding table. Created with
/// the reactor, dropped with it; the single-threaded discipline means
/// plain `RefCell` suffices.
pub struct ReactorCtx {
    pub reactor: Box<dyn Reactor>,
    pub sink: Box<dyn EventSink>,
    pub table: RefCell<BindingTable>,
}

impl ReactorCtx {
    pub fn new(reactor: Box<dyn Reactor>, sink: Box<dyn EventSink>) -> Rc<Self> {
        Rc::new(Self { reactor, sink, table: RefCell::new(BindingTable::default()) })
    }

    pub fn entry(&self, binding: Binding) -> Option<Entry> {
        self.table.borrow().get(binding)
    }

    /// Clones the descriptor handle out of the table so the table borrow
    /// is released before the descriptor is visited.
    pub fn descriptor(&self, binding: Binding) -> Option<Rc<RefCell<dyn Descriptor>>> {
        self.entry(binding).map(|e| e.as_descriptor())
    }

    pub fn connection(&self, binding: Binding) -> Option<Rc<RefCell<ConnectionDescriptor>>> {
        match self.entry(binding) {
            Some(Entry::Connection(d)) => Some(d),
            _ => None,
        }
    }

    pub fn acceptor(&self, binding: Binding) -> Option<Rc<RefCell<AcceptorDescriptor>>> {
        match self.entry(binding) {
            Some(Entry::Acceptor(d)) => Some(d),
            _ => None,
        }
    }

    pub fn datagram(&self, binding: Binding) -> Option<Rc<RefCell<DatagramDescriptor>>> {
        match self.entry(binding) {
            Some(Entry::Datagram(d)) => Some(d),
            _ => None,
        }
    }

    /// Retires every descriptor whose `should_delete` reports true.
    /// Returns how many were retired.
    pub fn sweep(&self) -> usize {
        let doomed: Vec<Binding> = {
            let table = self.table.borrow();
            table
                .bindings()
                .into_iter()
                .filter(|b| {
                    table.get(*b).is_some_and(|e| e.as_descriptor().borrow().should_delete())
                })
                .collect()
        };
        let n = doomed.len();
        for binding in doomed {
            self.retire(binding);
        }
        n
    }

    /// Removes one descriptor from the table and runs its terminal
    /// teardown. The table borrow is released before `unbind` runs, so the
    /// teardown may resolve proxy partners freely.
    pub fn retire(&self, binding: Binding) {
        let entry = self.table.borrow_mut().take(binding);
        if let Some(entry) = entry {
            entry.as_descriptor().borrow_mut().unbind();
        }
    }

    /// Force-retires everything, live or not. Used at reactor teardown.
    pub fn shutdown(&self) {
        let all = self.table.borrow().bindings();
        for binding in all {
            self.retire(binding);
        }
    }

    // ---- binding-addressed conveniences for user code ----

    pub fn close_connection(&self, binding: Binding, after_writing: bool) -> Result<(), ApiError> {
        let entry = self.entry(binding).ok_or(ApiError::UnknownBinding(binding))?;
        if let Entry::Connection(c) = &entry {
            if c.borrow().is_watch_only() {
                return Err(ApiError::WatchOnly);
            }
        }
        entry.as_descriptor().borrow_mut().schedule_close(after_writing);
        Ok(())
    }

    pub fn send_data(&self, binding: Binding, data: &[u8]) -> Result<usize, ApiError> {
        match self.entry(binding) {
            Some(Entry::Connection(d)) => d.borrow_mut().send_outbound_data(data),
            Some(Entry::Datagram(d)) => d.borrow_mut().send_outbound_data(data),
            Some(_) => Err(ApiError::WrongKind),
            None => Err(ApiError::UnknownBinding(binding)),
        }
    }

    pub fn pause(&self, binding: Binding) -> Result<bool, ApiError> {
        match self.entry(binding) {
            Some(Entry::Connection(d)) => d.borrow_mut().pause(),
            Some(Entry::Datagram(d)) => Ok(d.borrow_mut().pause()),
            Some(_) => Err(ApiError::WrongKind),
            None => Err(ApiError::UnknownBinding(binding)),
        }
    }

    pub fn resume(&self, binding: Binding) -> Result<bool, ApiError> {
        match self.entry(binding) {
            Some(Entry::Connection(d)) => d.borrow_mut().resume(),
            Some(Entry::Datagram(d)) => Ok(d.borrow_mut().resume()),
            Some(_) => Err(ApiError::WrongKind),
            None => Err(ApiError::UnknownBinding(binding)),
        }
    }

    pub fn start_proxy(
        &self,
        source: Binding,
        target: Binding,
        high_water: usize,
        length: u64,
    ) -> Result<(), ApiError> {
        match self.entry(source) {
            Some(Entry::Connection(d)) => d.borrow_mut().start_proxy(target, high_water, length),
            Some(Entry::Datagram(d)) => d.borrow_mut().start_proxy(target, high_water, length),
            Some(_) => Err(ApiError::WrongKind),
            None => Err(ApiError::UnknownBinding(source)),
        }
    }

    pub fn stop_proxy(&self, source: Binding) -> Result<(), ApiError> {
        match self.entry(source) {
            Some(Entry::Connection(d)) => {
                d.borrow_mut().stop_proxy();
                Ok(())
            }
            Some(Entry::Datagram(d)) => {
                d.borrow_mut().stop_proxy();
                Ok(())
            }
            Some(_) => Err(ApiError::WrongKind),
            None => Err(ApiError::UnknownBinding(source)),
        }
    }

    pub fn detach(&self, binding: Binding) -> Result<RawFd, ApiError> {
        match self.entry(binding) {
            Some(Entry::Connection(d)) => d.borrow_mut().detach(),
            Some(_) => Err(ApiError::WrongKind),
            None => Err(ApiError::UnknownBinding(binding)),
        }
    }

    pub fn run_heartbeat(&self, binding: Binding, now: Micros) {
        if let Some(d) = self.descriptor(binding) {
            d.borrow_mut().heartbeat(now);
        }
    }
}

/// Allocates a binding, builds the descriptor around its fresh lifecycle,
/// installs it and announces it to the poller.
pub(crate) fn register<F>(ctx: &Rc<ReactorCtx>, build: F) -> Binding
where
    F: FnOnce(Lifecycle) -> Entry,
{
    let binding = ctx.table.borrow_mut().reserve();
    let st = Lifecycle::new(ctx.clone(), binding);
    let entry = build(st);
    ctx.table.borrow_mut().install(binding, entry);
    ctx.reactor.add(binding);
    binding
}

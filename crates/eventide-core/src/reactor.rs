use std::{io, net::SocketAddr};

use crate::Binding;

/// Monotonic loop time in microseconds, owned by the reactor.
pub type Micros = u64;

/// Socket type hint for address resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockKind {
    Stream,
    Dgram,
}

/// The event loop the descriptor core runs inside.
///
/// Everything here executes on the single reactor thread; receivers take
/// `&self` and implementations use interior mutability. The reactor
/// outlives every descriptor registered with it.
pub trait Reactor {
    /// Registers a freshly constructed descriptor with the poller.
    fn add(&self, binding: Binding);

    /// Asks the poller to re-read the descriptor's interest predicates.
    /// Called whenever visible state affecting `select_for_read` /
    /// `select_for_write` changes.
    fn modify(&self, binding: Binding);

    /// Removes the descriptor from the poller.
    fn deregister(&self, binding: Binding);

    /// Schedules a heartbeat for `binding` at loop time `at`.
    fn queue_heartbeat(&self, binding: Binding, at: Micros);

    /// Cancels the heartbeat previously queued for loop time `at`.
    fn clear_heartbeat(&self, at: Micros, binding: Binding);

    /// Cached coarse clock, refreshed once per loop iteration.
    fn loop_time(&self) -> Micros;

    /// Fresh clock reading.
    fn real_time(&self) -> Micros;

    /// Slack added to inactivity deadlines so coarse ticks do not fire a
    /// timeout one quantum early.
    fn timer_quantum(&self) -> Micros;

    /// Name resolution on behalf of descriptors (datagram send paths).
    fn resolve(&self, host: &str, port: u16, kind: SockKind) -> io::Result<SocketAddr>;

    /// Upper bound on accepts performed in one readable tick.
    fn simultaneous_accept_count(&self) -> usize;

    /// A close was scheduled; lets the reactor bound sweep work per tick.
    fn close_scheduled(&self);

    /// A scheduled descriptor finished unbinding.
    fn close_finished(&self);

    /// Drains the loopbreak self-pipe and runs queued cross-thread work.
    fn read_loop_breaker(&self);

    /// Drains the filesystem-watch descriptor's kernel event queue.
    fn read_watch_events(&self);
}

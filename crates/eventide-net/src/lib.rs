//! The eventable-descriptor core of a single-threaded reactor: lifecycle
//! and I/O state machines for listening, stream, datagram, loopbreak and
//! filesystem-watch descriptors, with optional TLS pumping and one-way
//! proxy links.
//!
//! The event loop itself — poller backends, the timer wheel, name
//! resolution — lives outside, behind [`eventide_core::Reactor`]. The
//! reactor polls each descriptor according to its interest predicates,
//! calls `on_readable` / `on_writable` / `on_error` / `heartbeat`, and
//! retires descriptors whose `should_delete` reports true (see
//! [`ReactorCtx::sweep`]).

mod acceptor;
mod connection;
mod control;
mod datagram;
mod descriptor;
mod page;
mod sock;
mod sys;
mod table;
mod tls;

pub use acceptor::AcceptorDescriptor;
pub use connection::ConnectionDescriptor;
pub use control::{LoopbreakDescriptor, WatchDescriptor};
pub use datagram::DatagramDescriptor;
pub use descriptor::{
    DGRAM_SEND_BURST, Descriptor, READ_CHUNK, READ_ITERATIONS, WRITE_SEGMENTS,
};
pub use page::{OutboundPage, PageQueue};
pub use sock::{DgramSock, ListenSock, StreamSock, TcpListenSock, TcpSock, UdpSock};
pub use sys::Keepalive;
pub use table::{BindingTable, Entry, ReactorCtx};
pub use tls::{
    TLS_CIPHER_CHUNK, TLS_PLAIN_CHUNK, TlsConfig, TlsPull, TlsPush, TlsSession, TlsVersion,
};

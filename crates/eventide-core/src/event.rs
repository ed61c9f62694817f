use crate::Binding;

/// Discriminant of an [`Event`], for recording and matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Read,
    Completed,
    Accepted,
    Unbound,
    NotifyReadable,
    NotifyWritable,
    ProxyTargetUnbound,
    ProxyCompleted,
    TlsHandshakeCompleted,
}

/// One callback delivered from a descriptor to user code.
///
/// Borrowed payloads are only valid for the duration of the delivery; a
/// sink that needs them later must copy. Inbound `Read` payloads are backed
/// by a buffer carrying a guard NUL one past the reported length.
#[derive(Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// Inbound bytes on a stream or datagram descriptor.
    Read(&'a [u8]),
    /// An outbound connect finished successfully.
    Completed,
    /// A listener produced a new connection, identified by its binding.
    Accepted(Binding),
    /// Terminal event. Carries the unbind reason: 0 for graceful close, an
    /// OS errno for socket errors, `ETIMEDOUT` on timeout, `EPROTO` on a
    /// fatal TLS failure. Delivered at most once per descriptor.
    Unbound(i32),
    /// Watch-only readability edge.
    NotifyReadable,
    /// Watch-only writability edge.
    NotifyWritable,
    /// The proxy target of this descriptor was destroyed.
    ProxyTargetUnbound,
    /// The configured proxy byte limit was reached; subsequent inbound
    /// bytes flow through `Read` again.
    ProxyCompleted,
    /// The TLS handshake finished. Emitted exactly once.
    TlsHandshakeCompleted,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Read(_) => EventKind::Read,
            Event::Completed => EventKind::Completed,
            Event::Accepted(_) => EventKind::Accepted,
            Event::Unbound(_) => EventKind::Unbound,
            Event::NotifyReadable => EventKind::NotifyReadable,
            Event::NotifyWritable => EventKind::NotifyWritable,
            Event::ProxyTargetUnbound => EventKind::ProxyTargetUnbound,
            Event::ProxyCompleted => EventKind::ProxyCompleted,
            Event::TlsHandshakeCompleted => EventKind::TlsHandshakeCompleted,
        }
    }
}

/// The single callback channel the reactor registers for user-visible
/// events.
///
/// Receivers take `&self`; implementations use interior mutability. All
/// deliveries happen on the reactor thread. An implementation must not
/// re-enter the descriptor currently being visited.
pub trait EventSink {
    fn deliver(&self, binding: Binding, event: Event<'_>);

    /// TLS peer verification. Called while the handshake is paused on a
    /// verify decision; the return value accepts or rejects the peer
    /// certificate (DER bytes). Rejecting aborts the session.
    fn verify_peer(&self, binding: Binding, cert: &[u8]) -> bool {
        let _ = (binding, cert);
        false
    }
}

use std::io;

use thiserror::Error;

use crate::Binding;

/// Construction-time failures. No descriptor is registered when one of
/// these surfaces.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("socket setup failed")]
    Socket(#[from] io::Error),
    #[error("could not resolve {host}:{port}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// API misuse reported to the caller. The descriptor's state is unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("operation not supported on a watch-only descriptor")]
    WatchOnly,
    #[error("operation requires a watch-only descriptor")]
    NotWatchOnly,
    #[error("tls parameters are frozen once the session has started")]
    TlsStarted,
    #[error("proxy target already has an upstream")]
    ProxyTargetBusy,
    #[error("descriptor cannot proxy to itself")]
    ProxySelf,
    #[error("no descriptor bound to {0}")]
    UnknownBinding(Binding),
    #[error("no datagram peer to reply to")]
    NoPeer,
    #[error("descriptor kind does not support this operation")]
    WrongKind,
    #[error("descriptor is closed")]
    Closed,
}

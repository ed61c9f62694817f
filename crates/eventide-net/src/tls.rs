//! The seam to the TLS primitive.
//!
//! The descriptor core pumps ciphertext and plaintext through an opaque
//! [`TlsSession`]; the actual TLS engine lives outside this crate and is
//! injected at `start_tls` time. The pump itself — chunking, handshake
//! signalling, verify mediation, abort mapping — is implemented in
//! `ConnectionDescriptor`.

use std::path::PathBuf;

/// Plaintext chunk size for both directions of the pump. Inbound pulls
/// leave one byte of headroom for the guard NUL.
pub const TLS_PLAIN_CHUNK: usize = 2048;

/// Ciphertext drain buffer size.
pub const TLS_CIPHER_CHUNK: usize = 4096;

/// Outcome of a plaintext pull from the session.
#[derive(Debug, PartialEq, Eq)]
pub enum TlsPull {
    /// `n > 0` plaintext bytes were written into the buffer.
    Data(usize),
    /// Nothing decryptable yet; feed more ciphertext.
    WouldBlock,
    /// The handshake is paused on a peer-certificate decision; the caller
    /// answers through [`TlsSession::resolve_verify`].
    Verify,
    /// The session wants an orderly shutdown (close alert seen or queued).
    AbortPending,
    /// Unrecoverable handshake or record failure.
    Fatal,
}

/// Outcome of pushing plaintext into the session.
#[derive(Debug, PartialEq, Eq)]
pub enum TlsPush {
    /// Bytes absorbed. An empty-input pump reports progress the same way.
    Accepted(usize),
    /// Internal buffers are full; retry after draining ciphertext.
    WouldBlock,
    /// Unrecoverable failure.
    Fatal,
}

/// One TLS session overlaid on a stream descriptor.
///
/// All calls are nonblocking; "would block" answers mean the pump should
/// return to the reactor and retry on the next readiness edge.
pub trait TlsSession {
    /// Feeds bytes received from the peer.
    fn put_ciphertext(&mut self, data: &[u8]);

    /// Pulls decrypted application bytes into `buf`.
    fn get_plaintext(&mut self, buf: &mut [u8]) -> TlsPull;

    /// Pushes application bytes for encryption. An empty slice pumps
    /// internal buffers without adding input.
    fn put_plaintext(&mut self, data: &[u8]) -> TlsPush;

    /// Drains encrypted bytes destined for the peer into `buf`.
    fn get_ciphertext(&mut self, buf: &mut [u8]) -> usize;

    fn can_get_ciphertext(&self) -> bool;

    fn handshake_completed(&self) -> bool;

    /// Completes a [`TlsPull::Verify`] pause with the sink's decision.
    fn resolve_verify(&mut self, accepted: bool);

    /// Peer certificate in DER form, once the handshake has seen one.
    fn peer_cert(&self) -> Option<Vec<u8>>;

    fn cipher_name(&self) -> Option<String> {
        None
    }

    fn cipher_bits(&self) -> Option<u32> {
        None
    }

    fn cipher_protocol(&self) -> Option<String> {
        None
    }

    /// Hostname carried by the peer's SNI extension, server side.
    fn sni_hostname(&self) -> Option<String> {
        None
    }
}

/// TLS protocol versions, used to bound what the engine may negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// TLS parameters. Must be fixed before `start_tls`; setters fail once the
/// session exists.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    pub private_key_file: Option<PathBuf>,
    pub cert_chain_file: Option<PathBuf>,
    /// Ask the engine to surface the peer certificate for a verify
    /// decision instead of accepting silently.
    pub verify_peer: bool,
    pub sni_hostname: Option<String>,
    pub cipher_list: Option<String>,
    /// Lowest protocol version the engine may negotiate; `None` leaves the
    /// engine default.
    pub protocol_min: Option<TlsVersion>,
    /// Highest protocol version the engine may negotiate.
    pub protocol_max: Option<TlsVersion>,
}

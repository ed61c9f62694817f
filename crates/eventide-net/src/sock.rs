//! Seams between descriptors and the OS socket layer.
//!
//! Descriptors drive I/O through these traits so scenario tests can
//! substitute scripted implementations; the real ones wrap mio's
//! nonblocking socket types.

use std::{
    io::{self, IoSlice, Read, Write},
    mem::ManuallyDrop,
    net::{Shutdown, SocketAddr},
    os::fd::{AsRawFd, FromRawFd, RawFd},
};

use crate::sys::{self, Keepalive};

/// A connected (or connecting) byte stream.
pub trait StreamSock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;
    /// Reads and clears SO_ERROR; `Ok(0)` means a pending connect finished
    /// successfully.
    fn take_error(&mut self) -> io::Result<i32>;
    fn shutdown_write(&mut self);
    fn set_nodelay(&mut self, on: bool) -> io::Result<()>;
    /// `Some` enables keepalive with the given knobs, `None` disables it.
    fn set_keepalive(&mut self, cfg: Option<&Keepalive>) -> io::Result<()>;
    fn raw_fd(&self) -> RawFd;
}

/// A listening stream socket.
pub trait ListenSock {
    fn accept(&mut self) -> io::Result<(Box<dyn StreamSock>, SocketAddr)>;
    fn raw_fd(&self) -> RawFd;
}

/// A connectionless datagram socket.
pub trait DgramSock {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&mut self, buf: &[u8], dest: SocketAddr) -> io::Result<usize>;
    fn set_broadcast(&mut self) -> io::Result<()>;
    fn raw_fd(&self) -> RawFd;
}

/// mio-backed TCP stream.
///
/// An attached stream was adopted from outside and is released, not
/// closed, on drop; the std handles 0, 1, 2 are never closed either.
pub struct TcpSock {
    stream: ManuallyDrop<mio::net::TcpStream>,
    attached: bool,
}

impl TcpSock {
    /// Starts a nonblocking connect; completion is reported through the
    /// descriptor's writable path via SO_ERROR.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = mio::net::TcpStream::connect(addr)?;
        Ok(Self { stream: ManuallyDrop::new(stream), attached: false })
    }

    pub fn from_mio(stream: mio::net::TcpStream) -> Self {
        Self { stream: ManuallyDrop::new(stream), attached: false }
    }

    /// Adopts a foreign fd. The fd is made nonblocking and close-on-exec
    /// but ownership stays outside: it is never closed by this object.
    pub fn attach(fd: RawFd) -> io::Result<Self> {
        sys::set_nonblocking(fd)?;
        sys::set_cloexec(fd)?;
        let stream = unsafe { mio::net::TcpStream::from_raw_fd(fd) };
        Ok(Self { stream: ManuallyDrop::new(stream), attached: true })
    }
}

impl Drop for TcpSock {
    fn drop(&mut self) {
        let fd = self.stream.as_raw_fd();
        if self.attached || (0..=2).contains(&fd) {
            // not ours to close; leak the wrapper, keep the fd open
            return;
        }
        unsafe { ManuallyDrop::drop(&mut self.stream) }
    }
}

impl StreamSock for TcpSock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut *self.stream, buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        Write::write_vectored(&mut *self.stream, bufs)
    }

    fn take_error(&mut self) -> io::Result<i32> {
        sys::so_error(self.stream.as_raw_fd())
    }

    fn shutdown_write(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Write);
    }

    fn set_nodelay(&mut self, on: bool) -> io::Result<()> {
        self.stream.set_nodelay(on)
    }

    fn set_keepalive(&mut self, cfg: Option<&Keepalive>) -> io::Result<()> {
        sys::set_keepalive(self.stream.as_raw_fd(), cfg)
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// mio-backed TCP listener. Accepted streams arrive nonblocking and
/// close-on-exec (atomic accept4 where the OS has it).
pub struct TcpListenSock {
    listener: mio::net::TcpListener,
}

impl TcpListenSock {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self { listener: mio::net::TcpListener::bind(addr)? })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl ListenSock for TcpListenSock {
    fn accept(&mut self) -> io::Result<(Box<dyn StreamSock>, SocketAddr)> {
        let (stream, peer) = self.listener.accept()?;
        Ok((Box::new(TcpSock::from_mio(stream)) as Box<dyn StreamSock>, peer))
    }

    fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

/// mio-backed UDP socket.
pub struct UdpSock {
    socket: mio::net::UdpSocket,
}

impl UdpSock {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self { socket: mio::net::UdpSocket::bind(addr)? })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DgramSock for UdpSock {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn send_to(&mut self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, dest)
    }

    fn set_broadcast(&mut self) -> io::Result<()> {
        self.socket.set_broadcast(true)
    }

    fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// Transient errors end the current per-tick I/O loop; the next readiness
/// event resumes it. Everything else is terminal for the descriptor.
pub(crate) fn transient(e: &io::Error) -> bool {
    match e.raw_os_error() {
        Some(code) => {
            code == libc::EAGAIN ||
                code == libc::EWOULDBLOCK ||
                code == libc::EINTR ||
                code == libc::EINPROGRESS
        }
        None => matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted),
    }
}

pub(crate) fn errno_of(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(transient(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(transient(&io::Error::from_raw_os_error(libc::EINTR)));
        assert!(transient(&io::Error::from_raw_os_error(libc::EINPROGRESS)));
        assert!(!transient(&io::Error::from_raw_os_error(libc::ECONNRESET)));
        assert!(!transient(&io::Error::from_raw_os_error(libc::EPIPE)));
    }
}

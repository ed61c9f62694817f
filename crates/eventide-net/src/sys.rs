//! The setsockopt/fcntl surface mio does not expose.

use std::{io, mem, os::fd::RawFd};

/// TCP keepalive knobs. A value of zero or below leaves the system default
/// for that knob in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Keepalive {
    pub idle_secs: i32,
    pub interval_secs: i32,
    pub count: i32,
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, opt: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            opt,
            std::ptr::from_ref(&value).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// OR-merges FD_CLOEXEC with whatever descriptor flags are already set.
pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reads and clears SO_ERROR, returning the raw errno (0 when the last
/// asynchronous operation, typically a connect, succeeded).
pub(crate) fn so_error(fd: RawFd) -> io::Result<i32> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            std::ptr::from_mut(&mut err).cast::<libc::c_void>(),
            &raw mut len,
        )
    };
    if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(err) }
}

#[cfg(target_os = "linux")]
const KEEP_IDLE: libc::c_int = libc::TCP_KEEPIDLE;
#[cfg(any(target_os = "macos", target_os = "ios"))]
const KEEP_IDLE: libc::c_int = libc::TCP_KEEPALIVE;

/// `Some` turns SO_KEEPALIVE on and applies the per-knob overrides the OS
/// exposes; `None` turns SO_KEEPALIVE off.
pub(crate) fn set_keepalive(fd: RawFd, cfg: Option<&Keepalive>) -> io::Result<()> {
    let Some(k) = cfg else {
        return setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 0);
    };
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "ios"))]
    {
        if k.idle_secs > 0 {
            setsockopt_int(fd, libc::IPPROTO_TCP, KEEP_IDLE, k.idle_secs)?;
        }
        if k.interval_secs > 0 {
            setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, k.interval_secs)?;
        }
        if k.count > 0 {
            setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, k.count)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloexec_preserves_other_flags() {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let fd = fds[0];
        set_nonblocking(fd).unwrap();
        set_cloexec(fd).unwrap();
        let fl = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_ne!(fl & libc::O_NONBLOCK, 0, "cloexec must not clobber O_NONBLOCK");
        let fd_flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(fd_flags & libc::FD_CLOEXEC, 0);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}

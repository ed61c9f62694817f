use bitflags::bitflags;

bitflags! {
    /// Readiness the poller should watch a descriptor for.
    ///
    /// Derived from the pure `select_for_read` / `select_for_write`
    /// predicates; the poller backend is the reactor's business.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

impl Interest {
    pub const NONE: Interest = Interest::empty();

    /// Builds interest from the two selection predicates.
    pub fn from_rw(read: bool, write: bool) -> Self {
        let mut i = Interest::NONE;
        if read {
            i |= Interest::READABLE;
        }
        if write {
            i |= Interest::WRITABLE;
        }
        i
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rw() {
        assert_eq!(Interest::from_rw(false, false), Interest::NONE);
        assert_eq!(Interest::from_rw(true, false), Interest::READABLE);
        assert_eq!(Interest::from_rw(false, true), Interest::WRITABLE);
        assert_eq!(Interest::from_rw(true, true), Interest::READABLE | Interest::WRITABLE);
    }
}

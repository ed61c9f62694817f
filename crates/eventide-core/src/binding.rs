use std::fmt;

/// Opaque handle identifying a descriptor across the callback boundary.
///
/// User code never holds a descriptor reference, only its binding; the
/// binding table resolves it back while the descriptor is alive. A binding
/// is never reused within the lifetime of one reactor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Binding(pub u64);

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//! Contract types shared between the descriptor core and the reactor that
//! hosts it: binding handles, readiness interest, the event channel, the
//! error taxonomy and the [`Reactor`] collaborator trait.

mod assert;
mod binding;
mod error;
mod event;
mod interest;
mod reactor;

pub use binding::Binding;
pub use error::{ApiError, SetupError};
pub use event::{Event, EventKind, EventSink};
pub use interest::Interest;
pub use reactor::{Micros, Reactor, SockKind};

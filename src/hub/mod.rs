//! Real-time connection hub.
//!
//! One [`SessionHandle`] per connected user, held in the
//! [`ConnectionRegistry`]. Each session runs an inbound loop that feeds the
//! [`MessageRouter`] and an outbound loop that drains its bounded queue.
//! The [`RosterBroadcaster`] pushes presence lists on every connect and
//! disconnect.

mod protocol;
mod rate_limit;
mod registry;
mod roster;
mod router;
mod server;
mod session;

pub use protocol::{ChatMessage, ClientEvent, ServerEvent, TypingSignal};
pub use rate_limit::{EphemeralRateLimiter, DEFAULT_EPHEMERAL_INTERVAL};
pub use registry::ConnectionRegistry;
pub use roster::{build_roster, RosterBroadcaster, RosterEntry};
pub use router::MessageRouter;
pub use server::ChatHub;
pub use session::{run_inbound, run_outbound, SessionHandle};

//! Handshake authentication for the hub.
//!
//! Login and session management live elsewhere; the hub only needs to turn
//! an upgrade request into a user identifier.

mod token;

pub use token::{Authenticator, Claims};

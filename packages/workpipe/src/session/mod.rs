//! Session hand-off: tickets for accepted connections and the handlers that
//! serve them on worker slots.

pub mod builtin;
pub mod handler;
pub mod registry;

pub use self::handler::{SessionFactory, SessionHandler};
pub use self::registry::HandlerRegistry;

//! Handlers for long-lived network sessions handed to workers.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ConfigLookup;
use crate::pipeline::SessionTicket;
use crate::pipeline::result::DEFERRED_REASON;

/// One accepted session, driven to completion on a worker slot.
#[async_trait]
pub trait SessionHandler: Send {
    async fn handle_session(&mut self) -> Result<()>;
}

/// Creates a [`SessionHandler`] per ticket.
///
/// Registered in the [`HandlerRegistry`](super::HandlerRegistry) under
/// `module.class`.
pub trait SessionFactory: Send + Sync {
    fn create(&self, ticket: &SessionTicket, config: &dyn ConfigLookup)
    -> Result<Box<dyn SessionHandler>>;

    /// Answer a session that will never reach a worker.
    fn defer(&self, ticket: &SessionTicket) {
        tracing::info!(
            transport = %ticket.transport,
            port = ticket.port,
            handler = %ticket.handler_key(),
            "Deferring session: {DEFERRED_REASON}"
        );
    }
}

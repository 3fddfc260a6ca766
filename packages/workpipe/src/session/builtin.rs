use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use super::handler::{SessionFactory, SessionHandler};
use crate::config::ConfigLookup;
use crate::pipeline::SessionTicket;

pub const LOG_MODULE: &str = "log";
pub const LOG_CLASS: &str = "LogSession";

/// Logs the session and completes after `[session] hold_ms`.
pub struct LogSessionFactory;

impl SessionFactory for LogSessionFactory {
    fn create(
        &self,
        ticket: &SessionTicket,
        config: &dyn ConfigLookup,
    ) -> Result<Box<dyn SessionHandler>> {
        let hold_ms = config.get_int("session", "hold_ms").unwrap_or(0).max(0) as u64;
        Ok(Box::new(LogSession {
            ticket: ticket.clone(),
            hold: Duration::from_millis(hold_ms),
        }))
    }
}

struct LogSession {
    ticket: SessionTicket,
    hold: Duration,
}

#[async_trait]
impl SessionHandler for LogSession {
    async fn handle_session(&mut self) -> Result<()> {
        tracing::info!(
            transport = %self.ticket.transport,
            port = self.ticket.port,
            "Session opened"
        );
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        tracing::info!(transport = %self.ticket.transport, "Session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hold(i64);

    impl ConfigLookup for Hold {
        fn get_int(&self, section: &str, key: &str) -> Option<i64> {
            (section == "session" && key == "hold_ms").then_some(self.0)
        }
        fn get_bool(&self, _: &str, _: &str) -> Option<bool> {
            None
        }
        fn get_str(&self, _: &str, _: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn test_log_session_completes() {
        let ticket = SessionTicket::new("fd:9", LOG_MODULE, LOG_CLASS, 8025);
        let mut session = LogSessionFactory.create(&ticket, &Hold(5)).unwrap();
        session.handle_session().await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_hold_is_clamped() {
        let ticket = SessionTicket::new("fd:9", LOG_MODULE, LOG_CLASS, 8025);
        let mut session = LogSessionFactory.create(&ticket, &Hold(-10)).unwrap();
        session.handle_session().await.unwrap();
    }
}

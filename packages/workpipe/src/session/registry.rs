use std::collections::BTreeMap;
use std::sync::Arc;

use super::builtin;
use super::handler::SessionFactory;
use crate::config::ConfigLookup;
use crate::pipeline::{FilePipeline, SessionTicket, builtin as pipelines};

/// Named file pipelines and session factories a worker can resolve by name.
///
/// Process workers rebuild the registry on their side, so everything a
/// process pool uses must be registered by name rather than passed in.
pub struct HandlerRegistry {
    pipelines: BTreeMap<String, Arc<FilePipeline>>,
    sessions: BTreeMap<String, Arc<dyn SessionFactory>>,
    config: Arc<dyn ConfigLookup>,
}

impl HandlerRegistry {
    pub fn new(config: Arc<dyn ConfigLookup>) -> Self {
        Self {
            pipelines: BTreeMap::new(),
            sessions: BTreeMap::new(),
            config,
        }
    }

    /// Registry with the pipelines and sessions shipped in this crate.
    pub fn with_builtins(config: Arc<dyn ConfigLookup>) -> Self {
        let mut registry = Self::new(config);
        registry.register_pipeline(pipelines::COPY, pipelines::copy());
        registry.register_session(
            builtin::LOG_MODULE,
            builtin::LOG_CLASS,
            Arc::new(builtin::LogSessionFactory),
        );
        registry
    }

    pub fn register_pipeline(&mut self, name: impl Into<String>, pipeline: FilePipeline) {
        self.pipelines.insert(name.into(), Arc::new(pipeline));
    }

    pub fn register_session(&mut self, module: &str, class: &str, factory: Arc<dyn SessionFactory>) {
        self.sessions.insert(format!("{module}.{class}"), factory);
    }

    pub fn pipeline(&self, name: &str) -> Option<Arc<FilePipeline>> {
        self.pipelines.get(name).cloned()
    }

    pub fn pipeline_names(&self) -> Vec<String> {
        self.pipelines.keys().cloned().collect()
    }

    pub fn session(&self, key: &str) -> Option<Arc<dyn SessionFactory>> {
        self.sessions.get(key).cloned()
    }

    pub fn config(&self) -> &dyn ConfigLookup {
        self.config.as_ref()
    }

    /// Let the ticket's handler answer it with "retry later"; unknown
    /// handlers only get a log line.
    pub fn defer(&self, ticket: &SessionTicket) {
        match self.session(&ticket.handler_key()) {
            Some(factory) => factory.defer(ticket),
            None => tracing::warn!(
                handler = %ticket.handler_key(),
                port = ticket.port,
                "Dropping session for unregistered handler during shutdown"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandler;
    use anyhow::Result;
    use std::sync::Mutex;

    struct NoConfig;

    impl ConfigLookup for NoConfig {
        fn get_int(&self, _: &str, _: &str) -> Option<i64> {
            None
        }
        fn get_bool(&self, _: &str, _: &str) -> Option<bool> {
            None
        }
        fn get_str(&self, _: &str, _: &str) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct DeferSpy(Mutex<Vec<u16>>);

    impl SessionFactory for DeferSpy {
        fn create(&self, _: &SessionTicket, _: &dyn ConfigLookup) -> Result<Box<dyn SessionHandler>> {
            anyhow::bail!("not used")
        }

        fn defer(&self, ticket: &SessionTicket) {
            self.0.lock().unwrap().push(ticket.port);
        }
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = HandlerRegistry::with_builtins(Arc::new(NoConfig));
        assert_eq!(registry.pipeline_names(), vec!["copy".to_string()]);
        assert!(registry.pipeline("copy").is_some());
        assert!(registry.pipeline("nope").is_none());
        assert!(registry.session("log.LogSession").is_some());
    }

    #[test]
    fn test_defer_reaches_the_tickets_factory() {
        let spy = Arc::new(DeferSpy::default());
        let mut registry = HandlerRegistry::new(Arc::new(NoConfig));
        registry.register_session("smtp", "Relay", spy.clone());

        registry.defer(&SessionTicket::new("fd:4", "smtp", "Relay", 2525));
        registry.defer(&SessionTicket::new("fd:5", "smtp", "Unknown", 2526));
        assert_eq!(*spy.0.lock().unwrap(), vec![2525]);
    }
}

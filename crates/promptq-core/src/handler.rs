// Handler registry
//
// A handler is an opaque function from Task to Answer, identified by
// `<task_type>:<version>`. Implementations are compiled in and selected by the
// `import_path` field of their config; the registry only advertises handlers
// that survived a probe with a dummy task.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::HandlerError;
use crate::task::{Answer, Task};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_BACKOFF: Duration = Duration::from_secs(3);

/// Static description of a handler family, as published under
/// `handlers_configs` for the frontend to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HandlerConfig {
    pub name: String,
    pub task_type: String,
    /// Selects the compiled implementation, e.g. `builtin:echo`.
    pub import_path: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

impl HandlerConfig {
    pub fn handler_id(&self) -> String {
        format!("{}:{}", self.task_type, self.version)
    }
}

/// A pure function from Task to Answer, plus its published config.
pub trait TaskHandler: Send + Sync {
    fn config(&self) -> &HandlerConfig;

    /// Synchronous by contract: the dispatcher processes one task at a time
    /// and the call is not cancellable.
    fn handle(&self, task: &Task) -> Result<Answer, HandlerError>;
}

/// Handlers keyed by handler id.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.config().handler_id(), handler);
    }

    pub fn get(&self, handler_id: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(handler_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Advertised handler ids, sorted for stable registration payloads.
    pub fn handler_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn configs(&self) -> Vec<HandlerConfig> {
        self.handler_ids()
            .iter()
            .filter_map(|id| self.handlers.get(id))
            .map(|h| h.config().clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn TaskHandler>)> {
        self.handlers.iter()
    }
}

/// Instantiate the compiled implementation each config names.
///
/// Unknown import paths are the compiled-world analogue of an import error:
/// the config is dropped with a warning and the worker carries on.
pub fn build_registry(configs: &[HandlerConfig]) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for config in configs {
        match config.import_path.as_str() {
            "builtin:dummy" => registry.register(Arc::new(DummyHandler::new(config.clone()))),
            "builtin:echo" => registry.register(Arc::new(EchoHandler::new(config.clone()))),
            other => {
                tracing::warn!(
                    handler_id = %config.handler_id(),
                    import_path = %other,
                    "Unknown handler implementation, dropping"
                );
            }
        }
    }
    registry
}

/// Probe every handler with a dummy task and keep the ones that answer.
///
/// Each handler gets up to three attempts with a 3s pause between them, so
/// handlers that warm up slowly (model loading, remote clients) still make
/// the cut. Handlers that never answer are dropped and not advertised.
pub async fn verify_handlers(registry: HandlerRegistry) -> HandlerRegistry {
    let probe = Task::verification();
    let mut verified = HandlerRegistry::new();

    for (handler_id, handler) in registry.iter() {
        let mut last_err = None;
        for attempt in 1..=VERIFY_ATTEMPTS {
            match handler.handle(&probe) {
                Ok(_) => {
                    tracing::info!(handler_id = %handler_id, "Handler verified");
                    verified.register(handler.clone());
                    last_err = None;
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt < VERIFY_ATTEMPTS {
                        tokio::time::sleep(VERIFY_BACKOFF).await;
                    }
                }
            }
        }
        if let Some(e) = last_err {
            tracing::warn!(handler_id = %handler_id, error = %e, "Handler unavailable, dropping");
        }
    }

    verified
}

// ============================================
// Built-in handlers
// ============================================

/// Shuffles the prompt's characters. Exists to exercise the pipeline without
/// any model behind it.
pub struct DummyHandler {
    config: HandlerConfig,
}

impl DummyHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }
}

impl TaskHandler for DummyHandler {
    fn config(&self) -> &HandlerConfig {
        &self.config
    }

    fn handle(&self, task: &Task) -> Result<Answer, HandlerError> {
        let mut chars: Vec<char> = task.prompt.chars().collect();
        chars.shuffle(&mut rand::thread_rng());
        Ok(Answer::new(chars.into_iter().collect::<String>()))
    }
}

/// Returns the prompt verbatim.
pub struct EchoHandler {
    config: HandlerConfig,
}

impl EchoHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self { config }
    }
}

impl TaskHandler for EchoHandler {
    fn config(&self) -> &HandlerConfig {
        &self.config
    }

    fn handle(&self, task: &Task) -> Result<Answer, HandlerError> {
        Ok(Answer::new(task.prompt.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(task_type: &str, import_path: &str) -> HandlerConfig {
        HandlerConfig {
            name: task_type.to_string(),
            task_type: task_type.to_string(),
            import_path: import_path.to_string(),
            version: "1".to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn handler_id_joins_type_and_version() {
        assert_eq!(config("echo", "builtin:echo").handler_id(), "echo:1");
    }

    #[test]
    fn build_registry_drops_unknown_import_paths() {
        let registry = build_registry(&[
            config("echo", "builtin:echo"),
            config("rag", "handlers.rag:answer"),
        ]);
        assert_eq!(registry.handler_ids(), vec!["echo:1"]);
    }

    #[test]
    fn echo_returns_prompt() {
        let handler = EchoHandler::new(config("echo", "builtin:echo"));
        let answer = handler.handle(&Task::verification()).unwrap();
        assert_eq!(answer.text, "Привет");
    }

    #[test]
    fn dummy_permutes_prompt() {
        let handler = DummyHandler::new(config("dummy", "builtin:dummy"));
        let answer = handler.handle(&Task::verification()).unwrap();
        let mut got: Vec<char> = answer.text.chars().collect();
        let mut want: Vec<char> = "Привет".chars().collect();
        got.sort();
        want.sort();
        assert_eq!(got, want);
    }

    /// Fails a configurable number of times before answering - stands in for
    /// a handler that needs warm-up.
    struct FlakyHandler {
        config: HandlerConfig,
        failures_left: AtomicU32,
    }

    impl TaskHandler for FlakyHandler {
        fn config(&self) -> &HandlerConfig {
            &self.config
        }

        fn handle(&self, task: &Task) -> Result<Answer, HandlerError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(HandlerError::transient("warming up"));
            }
            Ok(Answer::new(task.prompt.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn verify_retries_then_keeps_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FlakyHandler {
            config: config("slow", "builtin:slow"),
            failures_left: AtomicU32::new(2),
        }));

        let verified = verify_handlers(registry).await;
        assert_eq!(verified.handler_ids(), vec!["slow:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn verify_drops_dead_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(FlakyHandler {
            config: config("dead", "builtin:dead"),
            failures_left: AtomicU32::new(u32::MAX),
        }));

        let verified = verify_handlers(registry).await;
        assert!(verified.is_empty());
    }
}

use super::CompleteState;
use crate::error::{GuardianError, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// The pieces a snapshot is built from. Each is captured independently.
pub trait StateSource {
    fn capture_process(&self) -> Result<Value>;

    fn capture_conversation(&self) -> Result<Value> {
        Ok(Value::Object(Map::new()))
    }

    fn capture_project(&self) -> Result<Value> {
        Ok(Value::Object(Map::new()))
    }
}

/// Application context supplied by the embedding program
pub trait ContextProvider: Send + Sync {
    fn conversation(&self) -> Result<Value>;

    fn project(&self) -> Result<Value>;

    /// Hand restored state back after a restart
    fn restore(&self, _state: &CompleteState) -> Result<()> {
        Ok(())
    }
}

/// Process snapshot from the guardian plus the optional caller context
pub struct GuardianSnapshot<'a> {
    pub process: Value,
    pub context: Option<&'a dyn ContextProvider>,
}

impl StateSource for GuardianSnapshot<'_> {
    fn capture_process(&self) -> Result<Value> {
        Ok(self.process.clone())
    }

    fn capture_conversation(&self) -> Result<Value> {
        match self.context {
            Some(provider) => provider.conversation(),
            None => Ok(Value::Object(Map::new())),
        }
    }

    fn capture_project(&self) -> Result<Value> {
        match self.context {
            Some(provider) => provider.project(),
            None => Ok(Value::Object(Map::new())),
        }
    }
}

pub(crate) fn compose(reason: &str, total_restarts: u64, source: &dyn StateSource) -> CompleteState {
    let now = Utc::now();

    let mut state = CompleteState::new();
    state.insert(
        "state_id",
        Value::String(now.format("%Y%m%d_%H%M%S_%6f").to_string()),
    );
    state.insert("captured_at", Value::String(now.to_rfc3339()));
    state.insert("reason", Value::String(reason.to_string()));
    state.insert("total_restarts", Value::from(total_restarts));
    state.insert("process", best_effort("process", || source.capture_process()));
    state.insert(
        "conversation",
        best_effort("conversation", || source.capture_conversation()),
    );
    state.insert("project", best_effort("project", || source.capture_project()));
    state
}

fn best_effort<F>(name: &str, capture: F) -> Value
where
    F: FnOnce() -> Result<Value>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(capture))
        .unwrap_or_else(|_| Err(GuardianError::Internal(format!("{} capture panicked", name))));

    match outcome {
        Ok(value) => value,
        Err(e) => {
            warn!(capture = name, "sub-capture failed: {}", e);
            json!({ "capture_failed": true, "error": e.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateConfig;
    use crate::state::StateManager;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    struct BrokenConversation;

    impl ContextProvider for BrokenConversation {
        fn conversation(&self) -> Result<Value> {
            Err(GuardianError::Other("history unavailable".to_string()))
        }

        fn project(&self) -> Result<Value> {
            Ok(json!({"name": "demo"}))
        }
    }

    struct PanickingProject;

    impl ContextProvider for PanickingProject {
        fn conversation(&self) -> Result<Value> {
            Ok(json!([]))
        }

        fn project(&self) -> Result<Value> {
            panic!("project index poisoned")
        }
    }

    #[test]
    fn test_compose_without_context() {
        let source = GuardianSnapshot {
            process: json!({"pid": 42}),
            context: None,
        };
        let state = compose("manual", 3, &source);

        assert_eq!(state.get("reason"), Some(&json!("manual")));
        assert_eq!(state.total_restarts(), Some(3));
        assert_eq!(state.get("process"), Some(&json!({"pid": 42})));
        assert_eq!(state.get("conversation"), Some(&json!({})));
        assert!(state.state_id().is_some());
    }

    #[test]
    fn test_failed_sub_capture_falls_back() {
        let provider = BrokenConversation;
        let source = GuardianSnapshot {
            process: json!({"pid": 1}),
            context: Some(&provider),
        };
        let state = compose("emergency", 0, &source);

        let conversation = state.get("conversation").unwrap();
        assert_eq!(conversation["capture_failed"], json!(true));
        assert!(conversation["error"].as_str().unwrap().contains("history unavailable"));
        assert_eq!(state.get("project"), Some(&json!({"name": "demo"})));
    }

    #[test]
    fn test_panicking_sub_capture_falls_back() {
        let provider = PanickingProject;
        let source = GuardianSnapshot {
            process: json!({}),
            context: Some(&provider),
        };
        let state = compose("leak", 0, &source);

        assert_eq!(state.get("project").unwrap()["capture_failed"], json!(true));
        assert_eq!(state.get("conversation"), Some(&json!([])));
    }

    #[test]
    fn test_capture_cooldown() {
        let dir = TempDir::new().unwrap();
        let config = StateConfig {
            capture_cooldown_secs: 60.0,
            ..StateConfig::default()
        };
        let mut manager = StateManager::new(dir.path(), config);
        let source = GuardianSnapshot {
            process: json!({"pid": 7}),
            context: None,
        };

        let start = Instant::now();
        assert!(manager.capture_state_at("first", &source, start).is_some());
        assert!(manager
            .capture_state_at("second", &source, start + Duration::from_secs(10))
            .is_none());
        assert_eq!(
            manager.last_captured().unwrap().get("reason"),
            Some(&json!("first"))
        );
        assert!(manager
            .capture_state_at("third", &source, start + Duration::from_secs(61))
            .is_some());
    }
}

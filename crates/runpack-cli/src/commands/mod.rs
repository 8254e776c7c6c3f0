pub mod build;
pub mod cache;
pub mod compile;
pub mod completions;
pub mod detect;
pub mod man_pages;
pub mod release;
pub mod resolve;

use indicatif::{ProgressBar, ProgressStyle};
use runpack_core::CoreError;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_CACHE_ERROR: u8 = 3;

/// A command error carrying the process exit code it maps to.
#[derive(Debug)]
pub struct Failure {
    pub code: u8,
    pub message: String,
}

impl Failure {
    pub fn config(message: String) -> Self {
        Self {
            code: EXIT_CONFIG_ERROR,
            message,
        }
    }
}

impl From<CoreError> for Failure {
    fn from(e: CoreError) -> Self {
        let code = if e.is_config() {
            EXIT_CONFIG_ERROR
        } else if e.is_cache() && !e.is_cancelled() {
            EXIT_CACHE_ERROR
        } else {
            EXIT_FAILURE
        };
        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self {
            code: EXIT_FAILURE,
            message,
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Runs `op` under a spinner unless output is JSON.
pub fn with_spinner<T>(
    json: bool,
    busy: &str,
    done: &str,
    failed: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, Failure> {
    let pb = if json { None } else { Some(spinner(busy)) };
    match op() {
        Ok(value) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, done);
            }
            Ok(value)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, failed);
            }
            Err(e.into())
        }
    }
}

pub fn colorize_category(category: &str) -> String {
    use console::Style;
    match category {
        "container" => Style::new().cyan().bold().apply_to(category).to_string(),
        "jre" => Style::new().green().apply_to(category).to_string(),
        "framework" => Style::new().yellow().apply_to(category).to_string(),
        "agent" => Style::new().blue().apply_to(category).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runpack_schema::{Category, ComponentId, SchemaError};

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_category_known_and_unknown() {
        assert!(colorize_category("container").contains("container"));
        assert!(colorize_category("agent").contains("agent"));
        assert_eq!(colorize_category("custom"), "custom");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
        assert_ne!(EXIT_CONFIG_ERROR, EXIT_CACHE_ERROR);
    }

    #[test]
    fn config_errors_map_to_config_exit_code() {
        let f = Failure::from(CoreError::from(SchemaError::Config("bad".to_owned())));
        assert_eq!(f.code, EXIT_CONFIG_ERROR);
        assert!(f.message.contains("bad"));
    }

    #[test]
    fn cache_errors_map_to_cache_exit_code() {
        let f = Failure::from(CoreError::from(runpack_cache::CacheError::DownloadFailed {
            uri: "https://example.com/a.tar".to_owned(),
            reason: "status 503".to_owned(),
        }));
        assert_eq!(f.code, EXIT_CACHE_ERROR);
    }

    #[test]
    fn cancellation_is_a_plain_failure() {
        let f = Failure::from(CoreError::from(runpack_cache::CacheError::Cancelled(
            "download".to_owned(),
        )));
        assert_eq!(f.code, EXIT_FAILURE);
    }

    #[test]
    fn protocol_errors_map_to_failure() {
        let f = Failure::from(CoreError::Conflict {
            category: Category::from("container"),
            components: vec![ComponentId::from("a"), ComponentId::from("b")],
        });
        assert_eq!(f.code, EXIT_FAILURE);
        assert_eq!(Failure::from("x".to_owned()).code, EXIT_FAILURE);
    }

    #[test]
    fn spinner_finishes_both_ways() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }

    #[test]
    fn with_spinner_converts_errors() {
        let err = with_spinner::<()>(true, "a", "b", "c", || Err(CoreError::NoStartCommand))
            .unwrap_err();
        assert_eq!(err.code, EXIT_FAILURE);
        assert_eq!(with_spinner(true, "a", "b", "c", || Ok(7)).unwrap(), 7);
    }
}

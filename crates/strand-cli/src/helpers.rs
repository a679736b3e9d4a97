//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization and rendering of kernel values for
//! terminal output.

use serde_json::json;
use strand_kernel::{Outcome, Value};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Convert a kernel value into JSON for display.
///
/// Composite-wait results keep their completion order as a list of
/// `[index, value]` pairs, since a JSON object would lose it.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(n) => json!(n),
        Value::Float(f) => json!(f),
        Value::Str(s) => json!(s),
        Value::Bytes(bytes) => json!(String::from_utf8_lossy(bytes)),
        Value::List(items) => items.iter().map(to_json).collect(),
        Value::Map(results) => results
            .iter()
            .map(|(index, value)| json!([index, to_json(value)]))
            .collect(),
        Value::Strand(id) => json!(id.to_string()),
        Value::Callback(_) => json!("<callback>"),
    }
}

/// One-line description of a strand's exit.
pub fn describe_outcome(outcome: Option<&Outcome>) -> String {
    match outcome {
        Some(Outcome::Succeeded(value)) => format!("succeeded with {}", to_json(value)),
        Some(Outcome::Failed(error)) => format!("failed: {error}"),
        Some(Outcome::Terminated) => "terminated".to_string(),
        None => "still running".to_string(),
    }
}

//! Logging utilities for ekman.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary (or to whichever application embeds the engine).

use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::field::GridField;
use crate::resample::field_min_max;

/// Initialize the tracing subscriber with the given log level
pub fn init_tracing(log_level: &str) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(val) => val,
        Err(_) => log_level.to_string(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Log a start message for a significant operation
pub fn log_operation_start(operation: &str, details: Option<&str>) {
    if let Some(details) = details {
        info!(
            operation = operation,
            details = details,
            "Starting operation"
        );
    } else {
        info!(operation = operation, "Starting operation");
    }
}

/// Log the completion of a significant operation
pub fn log_operation_end(operation: &str, start_time: Instant, success: bool) {
    let duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;

    if success {
        info!(
            operation = operation,
            duration_ms = duration_ms,
            "Operation completed successfully"
        );
    } else {
        warn!(
            operation = operation,
            duration_ms = duration_ms,
            "Operation failed"
        );
    }
}

/// Log an operation with timing and result in a single statement
pub fn log_timed_operation<F, R>(operation: &str, f: F) -> R
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let request_id = Uuid::new_v4();

    debug!(
        operation = operation,
        request_id = %request_id,
        "Starting operation"
    );

    let result = f();

    info!(
        operation = operation,
        request_id = %request_id,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Operation completed"
    );

    result
}

/// Log the shape and value range of a produced field
pub fn log_field_stats(operation: &str, field: &GridField) {
    let (min, max) = field_min_max(field);
    let params = field
        .params()
        .map(|p| p.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(","))
        .unwrap_or_default();
    let domain = field
        .spatial_domain()
        .map(|d| d.describe())
        .unwrap_or_else(|| "none".to_string());
    info!(
        operation = operation,
        params = %params,
        domain = %domain,
        steps = field.step_count(),
        min = min,
        max = max,
        "Field produced"
    );
}

/// Log an error with context
pub fn log_error(error: &crate::error::EkmanError, context: &str) {
    error!(
        error = %error,
        context = context,
        structural = error.is_structural(),
        error_type = std::any::type_name_of_val(error),
        "Error occurred"
    );
}

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Axis, LinearAxis, SampleDomain};
    use crate::field::{FlatGrid, Param};
    use crate::units::Unit;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_generate_request_id() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();

        assert!(!id1.is_empty());
        assert_ne!(id1, id2); // IDs should be unique
    }

    #[test]
    fn test_log_timed_operation() {
        // This is more of a functional test to ensure it doesn't panic
        let result = log_timed_operation("test_operation", || {
            // Simulate some work
            std::thread::sleep(Duration::from_millis(1));
            42
        });

        assert_eq!(result, 42);
    }

    #[test]
    fn test_log_error_accepts_structural_errors() {
        let err = crate::error::EkmanError::manifold("subset", "unable to subset in z for a 2D manifold");
        assert!(err.is_structural());
        log_error(&err, "subset");
    }

    #[test]
    fn test_log_field_stats_handles_missing_values() {
        let d = Arc::new(
            SampleDomain::linear(vec![Axis::longitude()], vec![LinearAxis::new(0.0, 1.0, 3)])
                .unwrap(),
        );
        let g = FlatGrid::scalar(d, Param::new("t", Unit::Kelvin), vec![1.0, f32::NAN, 3.0]).unwrap();
        log_field_stats("test", &g.into());
    }
}

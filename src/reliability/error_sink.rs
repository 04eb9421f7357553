use crate::domain::AppenderError;
use tracing::{error, warn};

/// Receives every failure the appender swallows.
///
/// Implementations must not block: `report` is called from the publish worker and
/// from the thread that appends.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: &AppenderError);
}

/// Logs failures through `tracing` under the `rask_log_publisher::errors` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, failure: &AppenderError) {
        match failure {
            AppenderError::Rejected => {
                warn!(target: "rask_log_publisher::errors", error = %failure, "Log event dropped");
            }
            AppenderError::ShutdownFailure { resource, reason } => {
                warn!(
                    target: "rask_log_publisher::errors",
                    %resource,
                    %reason,
                    "Failed to release broker resource"
                );
            }
            AppenderError::PublishFailure {
                correlation_id,
                reason,
            } => {
                error!(
                    target: "rask_log_publisher::errors",
                    %correlation_id,
                    %reason,
                    "Failed to publish log event"
                );
            }
            AppenderError::Connectivity(_) | AppenderError::TopologyConflict(_) => {
                error!(target: "rask_log_publisher::errors", error = %failure, "Broker error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_publish_failure_is_logged_with_correlation_id() {
        TracingErrorSink.report(&AppenderError::PublishFailure {
            correlation_id: "billing:1:2".to_string(),
            reason: "channel closed".to_string(),
        });

        assert!(logs_contain("Failed to publish log event"));
        assert!(logs_contain("billing:1:2"));
    }

    #[traced_test]
    #[test]
    fn test_topology_conflict_is_logged() {
        TracingErrorSink.report(&AppenderError::TopologyConflict(
            "exchange 'logs': inequivalent arg 'type'".to_string(),
        ));

        assert!(logs_contain("Topology conflict"));
    }
}

use tracing::{Span, info_span};

/// Span attached to everything a job monitor does, so every line carries the training id.
pub fn job_span(training_id: &str, job_name: &str) -> Span {
    info_span!("job", training_id = %training_id, job_name = %job_name)
}

use tracing::{Span, field};

use super::TraceId;

/// Root span for one desk request (create batch, issue, pay, cancel...).
/// `batch_code` and `or_number` are recorded later once they are known.
pub fn request_span(operation: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "request",
        operation = %operation,
        trace_id = %trace_id,
        batch_code = field::Empty,
        or_number = field::Empty
    )
}

/// Child span; inherits the trace id from the enclosing request span.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "step",
        name = %name,
        batch_code = field::Empty,
        or_number = field::Empty
    )
}

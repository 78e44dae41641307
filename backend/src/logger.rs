use std::time::Duration;

use tracing::{Span, field};

/// Records the batch/OR a request turned out to touch on the current span.
pub fn annotate_span(batch_code: &str, or_number: Option<u64>) {
    let span = Span::current();
    span.record("batch_code", field::display(batch_code));
    if let Some(n) = or_number {
        span.record("or_number", n);
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow storage operation detected"
        );
    }
    out
}

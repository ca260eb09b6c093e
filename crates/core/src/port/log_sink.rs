// Log stream port (§6.2) — an installable-once opaque sink. Every RPC
// dispatch appends one line, then a follow-up line with the result.
//
// Modeled as an explicit port, in the tracing_appender/tracing_subscriber
// layering style, rather than fixed log macros, since the sink must be
// installable by the embedding application rather than fixed at compile time.

use std::sync::OnceLock;

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write_line(&self, line: &str) {
        tracing::info!(target: "jobq::dispatch", "{line}");
    }
}

static SINK: OnceLock<Box<dyn LogSink>> = OnceLock::new();

/// Install a custom sink. Returns `false` if a sink was already installed
/// this startup cycle (installable at most once, per §6.2).
pub fn install(sink: Box<dyn LogSink>) -> bool {
    SINK.set(sink).is_ok()
}

fn sink() -> &'static dyn LogSink {
    SINK.get_or_init(|| Box::new(TracingLogSink)).as_ref()
}

pub fn log_dispatch(now: i64, caller_id: &str, method: &str, params: &serde_json::Value) {
    sink().write_line(&format!("{now}, {caller_id}, {method}, params: {params}"));
}

pub fn log_result(now: i64, caller_id: &str, method: &str, result: &serde_json::Value) {
    sink().write_line(&format!("{now}, {caller_id}, {method}, result: {result}"));
}

pub fn log_unauthorised(now: i64, caller_id: &str, method: &str) {
    sink().write_line(&format!("{now}, {caller_id}, {method}, UNAUTHORIZED."));
}

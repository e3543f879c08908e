//! Consistency verification between the document and key-value stores.

mod sink;
mod verifier;

pub use sink::{FanoutSink, JsonLinesSink, MemorySink, ReconciliationSink, SinkError, TracingSink};
pub use verifier::{ConsistencyVerifier, VerificationReport, VerifyError, VerifyOptions};

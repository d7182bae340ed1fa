//! Where recognized text goes once a hypothesis worker has it.

use crate::error::Result;
use crate::sync::lock;
use std::sync::{Arc, Mutex};

/// Pluggable handler for final hypotheses.
///
/// Called from hypothesis workers, one call per non-empty hypothesis.
/// Several workers may finish at once, so the session serializes calls.
pub trait HypothesisSink: Send + 'static {
    fn handle(&mut self, text: &str) -> Result<()>;

    /// Called once when the session shuts down. Returns accumulated text if applicable.
    fn finish(&mut self) -> Option<String> {
        None
    }

    /// Name for logging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Collects hypotheses in memory. Clones share the same storage, so a
/// test can keep one clone while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    collected: Arc<Mutex<Vec<String>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collected(&self) -> Vec<String> {
        lock(&self.collected).clone()
    }
}

impl HypothesisSink for CollectorSink {
    fn handle(&mut self, text: &str) -> Result<()> {
        lock(&self.collected).push(text.to_string());
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        let collected = lock(&self.collected);
        if collected.is_empty() {
            None
        } else {
            Some(collected.join(" "))
        }
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Discards everything. The default for sessions whose callers only
/// consume events.
pub struct NullSink;

impl HypothesisSink for NullSink {
    fn handle(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

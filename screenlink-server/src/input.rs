//! Input sink for the headless daemon: events are logged, not injected.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use screenlink_core::{InputEvent, InputSink, LinkError};

/// Logs every remote event at `info`.
#[derive(Debug, Default)]
pub struct LoggingInputSink {
    count: AtomicU64,
}

impl LoggingInputSink {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl InputSink for LoggingInputSink {
    fn inject(&self, event: &InputEvent) -> Result<(), LinkError> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if event.kind.is_pointer() {
            info!(n, kind = ?event.kind, x = event.x, y = event.y, pointer = event.action_code, "remote pointer");
        } else {
            info!(n, kind = ?event.kind, key = event.key_code, repeat = event.action_code, "remote key");
        }
        Ok(())
    }
}

//! Consumer-side thread harness draining a streaming pipeline.

use crate::error::Result;
use crate::item::DataItem;
use crate::stream::StreamingPipeline;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A thread that drains pipeline outputs into a sink closure.
///
/// The consumer keeps polling while [`output_pending`] holds — that is
/// while the pipeline runs, the output queue is non-empty or the output
/// side is still active — so late arrivals during shutdown are drained
/// rather than lost.
///
/// [`output_pending`]: StreamingPipeline::output_pending
pub struct DataConsumer {
    handle: Option<JoinHandle<()>>,
}

impl DataConsumer {
    /// Spawn a consumer thread over the given sink.
    pub fn start<F>(pipeline: Arc<StreamingPipeline>, mut sink: F) -> Result<Self>
    where
        F: FnMut(DataItem) + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name("millrace-consumer".to_string())
            .spawn(move || {
                while pipeline.output_pending() {
                    match pipeline.try_get_output() {
                        Some(item) => sink(item),
                        None => std::thread::sleep(Duration::from_millis(1)),
                    }
                }
                tracing::debug!("consumer finished, output drained");
            })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the consumer thread to finish draining.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DataConsumer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

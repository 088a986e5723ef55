//! Producer-side thread harness feeding a streaming pipeline.

use crate::error::Result;
use crate::item::DataItem;
use crate::stream::StreamingPipeline;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A thread that feeds items from a source into a pipeline.
///
/// The source closure is polled for items until it returns `None`
/// (end of stream) or the pipeline refuses further input; the producer
/// then closes the pipeline's input side so the driver can drain and
/// signal end-of-stream downstream.
///
/// # Example
///
/// ```rust,ignore
/// let producer = DataProducer::start(pipeline.clone(), {
///     let mut frames = camera.frames();
///     move || frames.next().map(DataItem::new)
/// })?;
/// producer.join();
/// ```
pub struct DataProducer {
    handle: Option<JoinHandle<()>>,
}

impl DataProducer {
    /// Spawn a producer thread over the given source.
    pub fn start<F>(pipeline: Arc<StreamingPipeline>, mut source: F) -> Result<Self>
    where
        F: FnMut() -> Option<DataItem> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name("millrace-producer".to_string())
            .spawn(move || {
                while let Some(item) = source() {
                    if !pipeline.add_input(item) {
                        tracing::warn!("pipeline input closed before source was exhausted");
                        break;
                    }
                }
                pipeline.close_input();
                tracing::debug!("producer finished, input closed");
            })?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the producer thread to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DataProducer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

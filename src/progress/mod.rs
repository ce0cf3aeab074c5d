//! Progress notification events emitted while a capture runs.

use std::rc::Rc;

/// Callback invoked for every [`ProgressEvent`]. Captures run on a single
/// thread, so listeners are plain `Rc` closures.
pub type ProgressListener = Rc<dyn Fn(&ProgressEvent)>;

/// One step of capture progress, from page load through resource retrieval
/// to the end of serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    PageLoading { url: String, frame: bool },
    PageLoaded { url: String, frame: bool },
    ResourcesInitializing { url: String },
    ResourcesInitialized { url: String, max: usize },
    ResourceLoaded { url: String, resource_url: String, index: usize },
    StageStarted { url: String, stage: usize, frame: bool },
    StageEnded { url: String, stage: usize, frame: bool },
    StageTaskStarted { url: String, stage: usize, task: &'static str, frame: bool },
    StageTaskEnded { url: String, stage: usize, task: &'static str, frame: bool },
    PageEnded { url: String },
}

pub(crate) fn emit(listener: &Option<ProgressListener>, event: ProgressEvent) {
    if let Some(listener) = listener {
        listener(&event);
    }
}

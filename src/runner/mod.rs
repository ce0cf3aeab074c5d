//! The four-stage pipeline driver.
//!
//! One [`Runner`] per document, root or nested. The stage table is data:
//! each stage lists its synchronous tasks (plain DOM mutations, executed
//! in order, never suspending) followed by its asynchronous tasks (fanned
//! out concurrently). A stage's parallel tasks all complete before the
//! next stage begins; the whole inlining process leans on that ordering.

use std::rc::Rc;
use std::task::Context;

use anyhow::Result;
use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};

use crate::batch_request::BatchRequest;
use crate::capture::PageData;
use crate::capture::data::CaptureData;
use crate::config::{CaptureOptions, OptionFlag};
use crate::fetch::{FetchOptions, ResourceFetcher};
use crate::processor::Processor;
use crate::progress::{ProgressEvent, ProgressListener, emit};

pub(crate) const RESOLVE_URLS_STAGE: usize = 0;
pub(crate) const REPLACE_DATA_STAGE: usize = 1;
pub(crate) const REPLACE_DOCS_STAGE: usize = 2;
pub(crate) const POST_PROCESS_STAGE: usize = 3;

/// Predicate deciding whether a stage task runs for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskGate {
    Always,
    WhenTrue(OptionFlag),
    WhenFalse(OptionFlag),
}

impl TaskGate {
    pub fn evaluate(&self, options: &CaptureOptions) -> bool {
        match self {
            TaskGate::Always => true,
            TaskGate::WhenTrue(flag) => options.flag(*flag),
            TaskGate::WhenFalse(flag) => !options.flag(*flag),
        }
    }
}

/// Every pipeline task, sequential and parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    PreProcessPage,
    InsertShadowRootContents,
    ReplaceStyleContents,
    IsolateSelectedContent,
    InsertVideoPosters,
    RemoveFrames,
    RemoveImports,
    RemoveScripts,
    RemoveVideoSources,
    RemoveAudioSources,
    RemoveDiscardedResources,
    ResetCharsetMeta,
    SetInputValues,
    InsertFaviconLink,
    ReplaceCanvasElements,
    InsertFonts,
    RemoveHiddenElements,
    ResolveHrefs,
    ResolveStyleAttributeUrls,
    ResolveStylesheetUrls,
    ResolveFrameUrls,
    ResolveImportUrls,
    RemoveUnusedStyles,
    RemoveAlternativeMedias,
    RemoveUnusedFonts,
    ProcessStylesheets,
    ProcessStyleAttributes,
    ProcessPageResources,
    ProcessScripts,
    RemoveAlternativeImages,
    RemoveAlternativeFonts,
    ProcessFrames,
    ProcessHtmlImports,
    ReplaceStylesheets,
    ReplaceStyleAttributes,
    InsertCssVariables,
    CompressHtml,
}

impl TaskAction {
    pub fn name(self) -> &'static str {
        match self {
            TaskAction::PreProcessPage => "pre_process_page",
            TaskAction::InsertShadowRootContents => "insert_shadow_root_contents",
            TaskAction::ReplaceStyleContents => "replace_style_contents",
            TaskAction::IsolateSelectedContent => "isolate_selected_content",
            TaskAction::InsertVideoPosters => "insert_video_posters",
            TaskAction::RemoveFrames => "remove_frames",
            TaskAction::RemoveImports => "remove_imports",
            TaskAction::RemoveScripts => "remove_scripts",
            TaskAction::RemoveVideoSources => "remove_video_sources",
            TaskAction::RemoveAudioSources => "remove_audio_sources",
            TaskAction::RemoveDiscardedResources => "remove_discarded_resources",
            TaskAction::ResetCharsetMeta => "reset_charset_meta",
            TaskAction::SetInputValues => "set_input_values",
            TaskAction::InsertFaviconLink => "insert_favicon_link",
            TaskAction::ReplaceCanvasElements => "replace_canvas_elements",
            TaskAction::InsertFonts => "insert_fonts",
            TaskAction::RemoveHiddenElements => "remove_hidden_elements",
            TaskAction::ResolveHrefs => "resolve_hrefs",
            TaskAction::ResolveStyleAttributeUrls => "resolve_style_attribute_urls",
            TaskAction::ResolveStylesheetUrls => "resolve_stylesheet_urls",
            TaskAction::ResolveFrameUrls => "resolve_frame_urls",
            TaskAction::ResolveImportUrls => "resolve_import_urls",
            TaskAction::RemoveUnusedStyles => "remove_unused_styles",
            TaskAction::RemoveAlternativeMedias => "remove_alternative_medias",
            TaskAction::RemoveUnusedFonts => "remove_unused_fonts",
            TaskAction::ProcessStylesheets => "process_stylesheets",
            TaskAction::ProcessStyleAttributes => "process_style_attributes",
            TaskAction::ProcessPageResources => "process_page_resources",
            TaskAction::ProcessScripts => "process_scripts",
            TaskAction::RemoveAlternativeImages => "remove_alternative_images",
            TaskAction::RemoveAlternativeFonts => "remove_alternative_fonts",
            TaskAction::ProcessFrames => "process_frames",
            TaskAction::ProcessHtmlImports => "process_html_imports",
            TaskAction::ReplaceStylesheets => "replace_stylesheets",
            TaskAction::ReplaceStyleAttributes => "replace_style_attributes",
            TaskAction::InsertCssVariables => "insert_css_variables",
            TaskAction::CompressHtml => "compress_html",
        }
    }
}

pub(crate) struct StageTask {
    pub gate: TaskGate,
    pub action: TaskAction,
}

pub(crate) struct Stage {
    pub sequential: &'static [StageTask],
    pub parallel: &'static [StageTask],
}

const fn always(action: TaskAction) -> StageTask {
    StageTask { gate: TaskGate::Always, action }
}

const fn when(flag: OptionFlag, action: TaskAction) -> StageTask {
    StageTask { gate: TaskGate::WhenTrue(flag), action }
}

const fn unless(flag: OptionFlag, action: TaskAction) -> StageTask {
    StageTask { gate: TaskGate::WhenFalse(flag), action }
}

/// The fixed pipeline: resolve URLs, replace data, replace documents,
/// post-process.
pub(crate) const STAGES: [Stage; 4] = [
    Stage {
        sequential: &[
            always(TaskAction::PreProcessPage),
            always(TaskAction::InsertShadowRootContents),
            always(TaskAction::ReplaceStyleContents),
            when(OptionFlag::SelectedContentOnly, TaskAction::IsolateSelectedContent),
            when(OptionFlag::RemoveVideoSources, TaskAction::InsertVideoPosters),
            when(OptionFlag::RemoveFrames, TaskAction::RemoveFrames),
            when(OptionFlag::RemoveImports, TaskAction::RemoveImports),
            when(OptionFlag::RemoveScripts, TaskAction::RemoveScripts),
            when(OptionFlag::RemoveVideoSources, TaskAction::RemoveVideoSources),
            when(OptionFlag::RemoveAudioSources, TaskAction::RemoveAudioSources),
            always(TaskAction::RemoveDiscardedResources),
            always(TaskAction::ResetCharsetMeta),
            always(TaskAction::SetInputValues),
            when(OptionFlag::InsertFaviconLink, TaskAction::InsertFaviconLink),
            always(TaskAction::ReplaceCanvasElements),
            always(TaskAction::InsertFonts),
            when(OptionFlag::RemoveHiddenElements, TaskAction::RemoveHiddenElements),
            always(TaskAction::ResolveHrefs),
            always(TaskAction::ResolveStyleAttributeUrls),
        ],
        parallel: &[
            always(TaskAction::ResolveStylesheetUrls),
            unless(OptionFlag::RemoveFrames, TaskAction::ResolveFrameUrls),
            unless(OptionFlag::RemoveImports, TaskAction::ResolveImportUrls),
        ],
    },
    Stage {
        sequential: &[
            when(OptionFlag::RemoveUnusedStyles, TaskAction::RemoveUnusedStyles),
            when(OptionFlag::RemoveAlternativeMedias, TaskAction::RemoveAlternativeMedias),
            when(OptionFlag::RemoveUnusedFonts, TaskAction::RemoveUnusedFonts),
        ],
        parallel: &[
            always(TaskAction::ProcessStylesheets),
            always(TaskAction::ProcessStyleAttributes),
            always(TaskAction::ProcessPageResources),
            unless(OptionFlag::RemoveScripts, TaskAction::ProcessScripts),
        ],
    },
    Stage {
        sequential: &[
            when(OptionFlag::RemoveAlternativeImages, TaskAction::RemoveAlternativeImages),
            when(OptionFlag::RemoveAlternativeFonts, TaskAction::RemoveAlternativeFonts),
        ],
        parallel: &[
            unless(OptionFlag::RemoveFrames, TaskAction::ProcessFrames),
            unless(OptionFlag::RemoveImports, TaskAction::ProcessHtmlImports),
        ],
    },
    Stage {
        sequential: &[
            always(TaskAction::ReplaceStylesheets),
            always(TaskAction::ReplaceStyleAttributes),
            always(TaskAction::InsertCssVariables),
            when(OptionFlag::CompressHtml, TaskAction::CompressHtml),
        ],
        parallel: &[],
    },
];

/// Drives one document through the pipeline. Root runners additionally
/// own resource-count accounting and trigger the shared batch.
pub struct Runner {
    root: bool,
    options: CaptureOptions,
    processor: Processor,
    batch: Rc<BatchRequest>,
    listener: Option<ProgressListener>,
    supplied_content: Option<String>,
    pending_stage: Option<LocalBoxFuture<'static, ()>>,
}

impl Runner {
    pub(crate) fn new(
        mut options: CaptureOptions,
        capture: CaptureData,
        content: Option<String>,
        root: bool,
        batch: Rc<BatchRequest>,
        fetcher: Rc<dyn ResourceFetcher>,
        listener: Option<ProgressListener>,
    ) -> Self {
        if options.save_raw_page {
            options.remove_frames = true;
        }
        let processor = Processor::new(
            options.clone(),
            capture,
            Rc::clone(&batch),
            fetcher,
            listener.clone(),
        );
        Self {
            root,
            options,
            processor,
            batch,
            listener,
            supplied_content: content,
            pending_stage: None,
        }
    }

    /// Fetch (when needed) and parse this document. The root document's
    /// failure here is the one fatal error of a capture.
    pub(crate) async fn load_page(&mut self) -> Result<()> {
        let url = self.options.url.clone();
        let frame = !self.root;
        emit(&self.listener, ProgressEvent::PageLoading { url: url.clone(), frame });
        self.processor.load_page(self.supplied_content.take()).await?;
        emit(&self.listener, ProgressEvent::PageLoaded { url, frame });
        Ok(())
    }

    /// Run stage 0 to completion, then start stage 1 without waiting for
    /// it. Stage 1 is polled exactly once so that every batch
    /// registration in its tasks' synchronous prefixes lands now; its
    /// network-bound remainder resolves during [`Runner::run`].
    pub(crate) async fn initialize(&mut self) -> Result<()> {
        emit(
            &self.listener,
            ProgressEvent::ResourcesInitializing { url: self.options.url.clone() },
        );
        self.stage_future(RESOLVE_URLS_STAGE).await;
        let mut pending = self.stage_future(REPLACE_DATA_STAGE);
        let waker = futures::task::noop_waker();
        let mut context = Context::from_waker(&waker);
        if pending.poll_unpin(&mut context).is_pending() {
            self.pending_stage = Some(pending);
        }
        Ok(())
    }

    /// Finalize resource accounting, retrieve every registered resource,
    /// then run stages 2 and 3.
    pub(crate) async fn run(&mut self) -> Result<()> {
        let url = self.options.url.clone();
        if self.root {
            self.processor.initialize_resource_count();
            emit(
                &self.listener,
                ProgressEvent::ResourcesInitialized {
                    url: url.clone(),
                    max: self.processor.max_resources(),
                },
            );
        }
        let fetch_options = FetchOptions {
            as_data_uri: false,
            max_size: self.options.max_resource_size,
            max_size_enabled: self.options.max_resource_size_enabled,
            charset: None,
        };
        let listener = self.listener.clone();
        let progress_url = url.clone();
        self.batch
            .run_all(&self.processor.inner.fetcher, &fetch_options, |index, resource_url| {
                emit(
                    &listener,
                    ProgressEvent::ResourceLoaded {
                        url: progress_url.clone(),
                        resource_url: resource_url.to_string(),
                        index,
                    },
                );
            })
            .await;
        if let Some(pending) = self.pending_stage.take() {
            pending.await;
        }
        self.stage_future(REPLACE_DOCS_STAGE).await;
        self.stage_future(POST_PROCESS_STAGE).await;
        self.processor.finalize();
        Ok(())
    }

    /// Emit end-of-page progress (root only) and serialize.
    pub(crate) fn page_data(&mut self) -> Result<PageData> {
        if self.root {
            emit(&self.listener, ProgressEvent::PageEnded { url: self.options.url.clone() });
        }
        self.processor.page_data()
    }

    /// Build one stage's future: sequential tasks in order, then the
    /// gated parallel tasks fanned out, then the stage-ended event. The
    /// future owns clones of everything it touches, so it can be stored
    /// across calls.
    fn stage_future(&self, stage: usize) -> LocalBoxFuture<'static, ()> {
        let processor = self.processor.clone();
        let options = self.options.clone();
        let listener = self.listener.clone();
        let frame = !self.root;
        Box::pin(async move {
            let url = options.url.clone();
            emit(&listener, ProgressEvent::StageStarted { url: url.clone(), stage, frame });
            for task in STAGES[stage].sequential {
                if !task.gate.evaluate(&options) {
                    continue;
                }
                emit(
                    &listener,
                    ProgressEvent::StageTaskStarted {
                        url: url.clone(),
                        stage,
                        task: task.action.name(),
                        frame,
                    },
                );
                processor.run_sequential(task.action);
                emit(
                    &listener,
                    ProgressEvent::StageTaskEnded {
                        url: url.clone(),
                        stage,
                        task: task.action.name(),
                        frame,
                    },
                );
            }
            let parallel: Vec<&'static StageTask> = STAGES[stage]
                .parallel
                .iter()
                .filter(|task| task.gate.evaluate(&options))
                .collect();
            join_all(parallel.into_iter().map(|task| {
                let processor = processor.clone();
                let listener = listener.clone();
                let url = url.clone();
                async move {
                    emit(
                        &listener,
                        ProgressEvent::StageTaskStarted {
                            url: url.clone(),
                            stage,
                            task: task.action.name(),
                            frame,
                        },
                    );
                    processor.run_parallel(task.action).await;
                    emit(
                        &listener,
                        ProgressEvent::StageTaskEnded { url, stage, task: task.action.name(), frame },
                    );
                }
            }))
            .await;
            emit(&listener, ProgressEvent::StageEnded { url, stage, frame });
        })
    }
}

//! The export pipeline.
//!
//! [`Exporter`] drives one export as a cooperative state machine: each
//! [`Exporter::step`] call runs one small unit of work (one stage, or one
//! item within a per-item stage) and returns, so a host can interleave the
//! export with its own event loop and honor cancellation between units.
//! [`Exporter::run`] just steps to completion.
//!
//! ## Stage order
//!
//! | Stage | Work |
//! |---|---|
//! | `Init` | resolve staging, build the item list |
//! | `ComputeLayout` | pagination geometry from the item count |
//! | `ParseTemplates` | load and parse the theme (fatal on a missing dir) |
//! | `FetchMetadata` | one bulk attribute fetch, then sort and name items |
//! | `LoadImages` | decode renditions, one item per step |
//! | `SaveImages` | encode renditions into staging, one item per step |
//! | `RenderImagePages` | render HTML, one item per step |
//! | `RenderIndexPages` | render the paginated index, one page per step |
//! | `CopyThemeAssets` | stylesheets and friends into staging |
//! | `CopyToDestination` | one bulk transport copy |
//! | `Cleanup` | staging removal, always runs |
//!
//! A failed stage records the first error, skips straight to `Cleanup`,
//! and the run ends [`Outcome::Failed`]; the destination is only touched
//! by `CopyToDestination`, so a failed or cancelled run never leaves a
//! half-written album behind. Per-item codec failures are not fatal: the
//! item is dropped after the save stage and the layout recomputed.

use crate::codec::{CodecError, EncodeFormat, ImageCodec, fit_within};
use crate::job::{
    ExportItem, JobState, PageLayout, Rendition, assign_stems, compute_layout, sort_items,
};
use crate::metadata::{MetadataError, MetadataSource, STANDARD_ATTRIBUTES};
use crate::paths::AlbumPaths;
use crate::render::Renderer;
use crate::settings::{ExportSettings, OutputImageFormat, SortKey};
use crate::template::Role;
use crate::theme::{Theme, ThemeError};
use crate::transport::{Transport, TransportError};
use log::warn;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Shared cancellation flag. Clones observe the same request, so a host
/// can hand one clone to a UI thread and keep stepping on another.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Theme(#[from] ThemeError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("destination copy failed: {0}")]
    Transport(TransportError),
}

/// How a run ended. Exactly one of these per export.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Failed(ExportError),
    Cancelled,
}

/// Progress reported over the optional channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted(Stage),
    /// One item finished within a per-item stage; `done` is 1-based.
    Item {
        stage: Stage,
        done: usize,
        total: usize,
    },
    /// Files copied to the destination so far.
    Copy { done: u64, total: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ComputeLayout,
    ParseTemplates,
    FetchMetadata,
    LoadImages,
    SaveImages,
    RenderImagePages,
    RenderIndexPages,
    CopyThemeAssets,
    CopyToDestination,
    Cleanup,
    Finished,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Init => "preparing",
            Stage::ComputeLayout => "computing layout",
            Stage::ParseTemplates => "parsing theme",
            Stage::FetchMetadata => "reading metadata",
            Stage::LoadImages => "loading images",
            Stage::SaveImages => "saving images",
            Stage::RenderImagePages => "rendering image pages",
            Stage::RenderIndexPages => "rendering index pages",
            Stage::CopyThemeAssets => "copying theme files",
            Stage::CopyToDestination => "copying to destination",
            Stage::Cleanup => "cleaning up",
            Stage::Finished => "finished",
        }
    }
}

/// Result of one [`Exporter::step`] call.
#[derive(Debug)]
pub enum StepResult {
    /// More work remains; the stage just executed.
    Running(Stage),
    Done(Outcome),
}

/// One export run over pluggable collaborators.
pub struct Exporter<'a> {
    settings: &'a ExportSettings,
    codec: &'a dyn ImageCodec,
    metadata: &'a dyn MetadataSource,
    transport: &'a dyn Transport,
    sources: Vec<PathBuf>,
    cancel: CancelFlag,
    progress: Option<Sender<ProgressEvent>>,

    paths: AlbumPaths,
    staging: PathBuf,
    stage: Stage,
    job: JobState,
    theme: Option<Theme>,
    pending: Option<Outcome>,
}

impl<'a> Exporter<'a> {
    pub fn new(
        settings: &'a ExportSettings,
        codec: &'a dyn ImageCodec,
        metadata: &'a dyn MetadataSource,
        transport: &'a dyn Transport,
        sources: Vec<PathBuf>,
    ) -> Exporter<'a> {
        let staging = settings
            .staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("webalbum-{}", std::process::id())));
        Exporter {
            settings,
            codec,
            metadata,
            transport,
            sources,
            cancel: CancelFlag::new(),
            progress: None,
            paths: AlbumPaths::new(settings),
            staging,
            stage: Stage::Init,
            job: JobState::default(),
            theme: None,
            pending: None,
        }
    }

    /// Report progress events over a channel. Send failures are ignored,
    /// so a dropped receiver never stalls the export.
    pub fn with_progress(mut self, sender: Sender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// The flag a host uses to request cancellation.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Run one unit of work. Cancellation is observed here, between
    /// units; cleanup still runs after a cancel.
    pub fn step(&mut self) -> StepResult {
        if self.stage == Stage::Finished {
            return StepResult::Done(self.pending.take().unwrap_or(Outcome::Completed));
        }
        if self.cancel.is_requested()
            && self.stage != Stage::Cleanup
            && self.pending.is_none()
        {
            self.pending = Some(Outcome::Cancelled);
            self.stage = Stage::Cleanup;
            return StepResult::Running(Stage::Cleanup);
        }

        let ran = self.stage;
        let result = match self.stage {
            Stage::Init => self.run_init(),
            Stage::ComputeLayout => self.run_compute_layout(),
            Stage::ParseTemplates => self.run_parse_templates(),
            Stage::FetchMetadata => self.run_fetch_metadata(),
            Stage::LoadImages => self.run_load_one(),
            Stage::SaveImages => self.run_save_one(),
            Stage::RenderImagePages => self.run_render_image_pages(),
            Stage::RenderIndexPages => self.run_render_index_pages(),
            Stage::CopyThemeAssets => self.run_copy_theme_assets(),
            Stage::CopyToDestination => self.run_copy_to_destination(),
            Stage::Cleanup | Stage::Finished => {
                self.run_cleanup();
                return StepResult::Done(self.pending.take().unwrap_or(Outcome::Completed));
            }
        };
        if let Err(e) = result {
            self.fail(e);
        }
        StepResult::Running(ran)
    }

    /// Step to completion.
    pub fn run(&mut self) -> Outcome {
        loop {
            if let StepResult::Done(outcome) = self.step() {
                return outcome;
            }
        }
    }

    /// Record the error and divert to cleanup. A failure ends the stage
    /// sequence, so the first recorded error is the one the run reports;
    /// `Cleanup` itself never errors.
    fn fail(&mut self, error: ExportError) {
        debug_assert!(self.pending.is_none(), "error after the run settled");
        self.pending = Some(Outcome::Failed(error));
        self.stage = Stage::Cleanup;
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.progress {
            let _ = sender.send(event);
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.job.current_item = 0;
        self.job.current_page = 0;
        self.emit(ProgressEvent::StageStarted(stage));
    }

    fn layout(&self) -> PageLayout {
        self.job
            .layout
            .unwrap_or_else(|| compute_layout(self.job.items.len(), self.settings))
    }

    fn loaded_theme(&self) -> Result<&Theme, ExportError> {
        self.theme
            .as_ref()
            .ok_or_else(|| ExportError::Io(std::io::Error::other("theme not loaded")))
    }

    /// Absolute staging path for an album-root-relative name, with parent
    /// directories created. Nothing under the staging root exists before
    /// the first call.
    fn staging_file(&self, rel: &str) -> Result<PathBuf, ExportError> {
        let mut path = self.staging.clone();
        path.extend(rel.split('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    fn run_init(&mut self) -> Result<(), ExportError> {
        self.emit(ProgressEvent::StageStarted(Stage::Init));
        self.job.items = self
            .sources
            .iter()
            .map(|source| ExportItem::new(source.clone()))
            .collect();
        self.enter(Stage::ComputeLayout);
        Ok(())
    }

    fn run_compute_layout(&mut self) -> Result<(), ExportError> {
        self.job.layout = Some(compute_layout(self.job.items.len(), self.settings));
        self.enter(Stage::ParseTemplates);
        Ok(())
    }

    fn run_parse_templates(&mut self) -> Result<(), ExportError> {
        self.theme = Some(Theme::load(&self.settings.theme_dir)?);
        self.enter(Stage::FetchMetadata);
        Ok(())
    }

    /// One bulk fetch for every attribute the run can need, then the
    /// single pre-pipeline sort and stem assignment.
    fn run_fetch_metadata(&mut self) -> Result<(), ExportError> {
        let mut attributes: Vec<String> =
            STANDARD_ATTRIBUTES.iter().map(|s| s.to_string()).collect();
        for field in self.settings.caption_field_list() {
            if !attributes.contains(&field) {
                attributes.push(field);
            }
        }
        if let SortKey::Attribute(attr) = &self.settings.sort_by
            && !attributes.contains(attr)
        {
            attributes.push(attr.clone());
        }
        let mut fetched = self.metadata.fetch(&self.sources, &attributes)?;
        for item in &mut self.job.items {
            if let Some(map) = fetched.remove(&item.source) {
                item.attributes = map;
            }
        }
        sort_items(
            &mut self.job.items,
            &self.settings.sort_by,
            self.settings.sort_direction,
        );
        assign_stems(&mut self.job.items);
        self.enter(Stage::LoadImages);
        Ok(())
    }

    fn run_load_one(&mut self) -> Result<(), ExportError> {
        let i = self.job.current_item;
        if i >= self.job.items.len() {
            self.enter(Stage::SaveImages);
            return Ok(());
        }
        if let Err(e) = self.load_item(i) {
            warn!(
                "skipping {}: {e}",
                self.job.items[i].source.display()
            );
            self.job.items[i].failed = true;
        }
        self.job.current_item = i + 1;
        self.emit(ProgressEvent::Item {
            stage: Stage::LoadImages,
            done: i + 1,
            total: self.job.items.len(),
        });
        Ok(())
    }

    /// Decode one item's renditions into memory. The preview is skipped
    /// entirely when it would match the full rendition pixel for pixel;
    /// preview requests then serve the full file.
    fn load_item(&mut self, i: usize) -> Result<(), CodecError> {
        let source = self.job.items[i].source.clone();
        let dims = self.codec.identify(&source)?;

        enum FullPlan {
            None,
            Encoded(crate::codec::Bitmap),
            Verbatim((u32, u32)),
        }
        let full = match (self.settings.copy_originals, self.settings.resize_originals_to) {
            (false, _) => FullPlan::None,
            (true, Some(bound)) => FullPlan::Encoded(self.codec.decode(&source, Some(bound))?),
            (true, None) => FullPlan::Verbatim(dims),
        };
        let full_dims = match &full {
            FullPlan::None => None,
            FullPlan::Encoded(bitmap) => Some(bitmap.dimensions()),
            FullPlan::Verbatim(dims) => Some(*dims),
        };

        let thumbnail = self
            .codec
            .decode(&source, Some(self.settings.thumbnail_size))?;
        let preview_dims = fit_within(dims, self.settings.preview_size);
        let preview = if full_dims == Some(preview_dims) {
            None
        } else {
            Some(self.codec.decode(&source, Some(self.settings.preview_size))?)
        };

        let rendition_ext = self.settings.output_format.extension().to_string();
        let item = &mut self.job.items[i];
        item.thumbnail = Some(Rendition::pending(thumbnail));
        item.preview = preview.map(Rendition::pending);
        match full {
            FullPlan::None => {}
            FullPlan::Encoded(bitmap) => {
                item.full = Some(Rendition::pending(bitmap));
                item.full_ext = rendition_ext;
            }
            FullPlan::Verbatim((w, h)) => {
                item.full = Some(Rendition::sized(w, h));
                item.full_copied = true;
                item.full_ext = source
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or(rendition_ext);
            }
        }
        Ok(())
    }

    fn run_save_one(&mut self) -> Result<(), ExportError> {
        let i = self.job.current_item;
        if i >= self.job.items.len() {
            // failed items contribute nothing from here on
            self.job.items.retain(|item| !item.failed);
            self.job.layout = Some(compute_layout(self.job.items.len(), self.settings));
            self.enter(Stage::RenderImagePages);
            return Ok(());
        }
        if !self.job.items[i].failed {
            self.save_item(i)?;
        }
        self.job.current_item = i + 1;
        self.emit(ProgressEvent::Item {
            stage: Stage::SaveImages,
            done: i + 1,
            total: self.job.items.len(),
        });
        Ok(())
    }

    /// Write one item's renditions into staging and drop the bitmaps.
    /// Encode failures mark the item failed; staging IO failures are
    /// fatal.
    fn save_item(&mut self, i: usize) -> Result<(), ExportError> {
        let format = match self.settings.output_format {
            OutputImageFormat::Jpeg => EncodeFormat::Jpeg {
                quality: self.settings.quality,
            },
            OutputImageFormat::Png => EncodeFormat::Png,
        };
        let stem = self.job.items[i].stem.clone();
        let targets = [
            (self.paths.thumbnail_rel(&stem), SlotKind::Thumbnail),
            (self.paths.preview_rel(&stem), SlotKind::Preview),
            (
                self.paths.full_rel(&stem, &self.job.items[i].full_ext),
                SlotKind::Full,
            ),
        ];
        for (rel, slot) in targets {
            let Some(bitmap) = take_pending(&mut self.job.items[i], slot) else {
                continue;
            };
            let path = self.staging_file(&rel)?;
            if let Err(e) = self.codec.encode(&bitmap, &path, format) {
                warn!("dropping {}: {e}", self.job.items[i].source.display());
                self.drop_item_files(i);
                return Ok(());
            }
        }
        if self.job.items[i].full_copied {
            let rel = self.paths.full_rel(&stem, &self.job.items[i].full_ext);
            let path = self.staging_file(&rel)?;
            if let Err(e) = std::fs::copy(&self.job.items[i].source, &path) {
                warn!("dropping {}: {e}", self.job.items[i].source.display());
                self.drop_item_files(i);
            }
        }
        Ok(())
    }

    /// Mark an item failed mid-save and sweep any rendition files it
    /// already wrote, so dropped items leave nothing to publish.
    fn drop_item_files(&mut self, i: usize) {
        self.job.items[i].failed = true;
        let stem = self.job.items[i].stem.clone();
        for rel in [
            self.paths.thumbnail_rel(&stem),
            self.paths.preview_rel(&stem),
            self.paths.full_rel(&stem, &self.job.items[i].full_ext),
        ] {
            let mut path = self.staging.clone();
            path.extend(rel.split('/'));
            if path.exists() && let Err(e) = std::fs::remove_file(&path) {
                warn!("could not remove {}: {e}", path.display());
            }
        }
    }

    fn run_render_image_pages(&mut self) -> Result<(), ExportError> {
        let idx = self.job.current_item;
        let total = self.job.items.len();
        if idx >= total {
            self.enter(Stage::RenderIndexPages);
            return Ok(());
        }
        self.render_one_image_page(idx)?;
        self.job.current_item = idx + 1;
        self.emit(ProgressEvent::Item {
            stage: Stage::RenderImagePages,
            done: idx + 1,
            total,
        });
        Ok(())
    }

    fn render_one_image_page(&self, idx: usize) -> Result<(), ExportError> {
        let theme = self.loaded_theme()?;
        let renderer = Renderer::new(
            self.settings,
            &self.paths,
            self.layout(),
            &self.job.items,
            theme.document(Role::ThumbnailCell),
        );
        let path = self.staging_file(&self.paths.image_page_rel(&self.job.items[idx].stem))?;
        let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
        renderer.render_image_page(theme.document(Role::ImagePage), idx, &mut out)?;
        out.flush()?;
        Ok(())
    }

    fn run_render_index_pages(&mut self) -> Result<(), ExportError> {
        let layout = self.layout();
        let page = self.job.current_page;
        if page >= layout.page_count {
            self.enter(Stage::CopyThemeAssets);
            return Ok(());
        }
        self.render_one_index_page(page)?;
        self.job.current_page = page + 1;
        self.emit(ProgressEvent::Item {
            stage: Stage::RenderIndexPages,
            done: page as usize + 1,
            total: layout.page_count as usize,
        });
        Ok(())
    }

    fn render_one_index_page(&self, page: u32) -> Result<(), ExportError> {
        let theme = self.loaded_theme()?;
        let renderer = Renderer::new(
            self.settings,
            &self.paths,
            self.layout(),
            &self.job.items,
            theme.document(Role::ThumbnailCell),
        );
        let path = self.staging_file(&self.paths.index_page_rel(page))?;
        let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
        renderer.render_index_page(theme.document(Role::Index), page, &mut out)?;
        out.flush()?;
        Ok(())
    }

    fn run_copy_theme_assets(&mut self) -> Result<(), ExportError> {
        let theme = self.loaded_theme()?;
        let assets: Vec<(PathBuf, String)> = theme
            .assets
            .iter()
            .map(|asset| (theme.asset_path(asset), self.paths.theme_rel(asset)))
            .collect();
        for (from, rel) in assets {
            let to = self.staging_file(&rel)?;
            std::fs::copy(&from, &to)?;
        }
        self.enter(Stage::CopyToDestination);
        Ok(())
    }

    fn run_copy_to_destination(&mut self) -> Result<(), ExportError> {
        let progress = self.progress.clone();
        let result = self.transport.copy_tree(
            &self.staging,
            &self.settings.destination,
            &mut |done, total| {
                if let Some(sender) = &progress {
                    let _ = sender.send(ProgressEvent::Copy { done, total });
                }
            },
            &self.cancel,
        );
        match result {
            Ok(()) => {
                self.stage = Stage::Cleanup;
                Ok(())
            }
            Err(TransportError::Cancelled) => {
                if self.pending.is_none() {
                    self.pending = Some(Outcome::Cancelled);
                }
                self.stage = Stage::Cleanup;
                Ok(())
            }
            Err(e) => Err(ExportError::Transport(e)),
        }
    }

    /// Unconditional staging removal. Runs after success, failure, and
    /// cancellation alike; removal problems are logged, never fatal.
    fn run_cleanup(&mut self) {
        self.emit(ProgressEvent::StageStarted(Stage::Cleanup));
        if let Err(e) = self.transport.remove_tree(&self.staging) {
            warn!("could not remove staging {}: {e}", self.staging.display());
        }
        self.stage = Stage::Finished;
    }
}

#[derive(Clone, Copy)]
enum SlotKind {
    Thumbnail,
    Preview,
    Full,
}

fn take_pending(item: &mut ExportItem, slot: SlotKind) -> Option<crate::codec::Bitmap> {
    let rendition = match slot {
        SlotKind::Thumbnail => item.thumbnail.as_mut(),
        SlotKind::Preview => item.preview.as_mut(),
        SlotKind::Full => item.full.as_mut(),
    };
    rendition.and_then(|r| r.bitmap.take())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{MockCodec, RecordedOp};
    use crate::metadata::FileMetadataSource;
    use crate::transport::LocalTransport;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        settings: ExportSettings,
        sources: Vec<PathBuf>,
    }

    impl Harness {
        fn new(source_names: &[&str]) -> Harness {
            let tmp = TempDir::new().unwrap();
            let theme_dir = tmp.path().join("theme");
            fs::create_dir(&theme_dir).unwrap();
            fs::write(
                theme_dir.join("index.tmpl"),
                "<h1><!--album:header --></h1>\n<table><!--album:grid --></table>",
            )
            .unwrap();
            fs::write(
                theme_dir.join("image.tmpl"),
                "<!--album:image size=\"preview\" -->\n\
                 <!--album:fields --><p><!--album:value name=\"field_value\" --></p>\
                 <!--album:endfields -->",
            )
            .unwrap();
            fs::write(
                theme_dir.join("thumbnail.tmpl"),
                "<a href=\"<!--album:link target=\"image_page\" -->\">\
                 <!--album:image size=\"thumbnail\" --></a>",
            )
            .unwrap();
            fs::write(theme_dir.join("style.css"), "body {}").unwrap();

            let src_dir = tmp.path().join("photos");
            fs::create_dir(&src_dir).unwrap();
            let sources = source_names
                .iter()
                .map(|name| {
                    let path = src_dir.join(name);
                    fs::write(&path, "source-bytes").unwrap();
                    path
                })
                .collect();

            let settings = ExportSettings {
                theme_dir,
                destination: tmp.path().join("album"),
                staging_dir: Some(tmp.path().join("staging")),
                album_title: "Trip".to_string(),
                ..Default::default()
            };
            Harness {
                _tmp: tmp,
                settings,
                sources,
            }
        }

        fn staging(&self) -> &Path {
            self.settings.staging_dir.as_deref().unwrap()
        }
    }

    fn exists(root: &Path, rel: &str) -> bool {
        root.join(rel).exists()
    }

    // =========================================================================
    // Full runs
    // =========================================================================

    #[test]
    fn completed_run_publishes_the_album() {
        let h = Harness::new(&["b.jpg", "a.jpg"]);
        let codec = MockCodec::new((1600, 1200));
        let exporter_result = {
            let mut exporter = Exporter::new(
                &h.settings,
                &codec,
                &FileMetadataSource,
                &LocalTransport,
                h.sources.clone(),
            );
            exporter.run()
        };
        assert!(matches!(exporter_result, Outcome::Completed));

        let dest = &h.settings.destination;
        // sorted by name, so a.jpg takes position 001
        assert!(exists(dest, "index.html"));
        assert!(exists(dest, "thumbnails/001-a.thumb.jpg"));
        assert!(exists(dest, "previews/001-a.preview.jpg"));
        assert!(exists(dest, "images/001-a.jpg"));
        assert!(exists(dest, "pages/001-a.html"));
        assert!(exists(dest, "pages/002-b.html"));
        assert!(exists(dest, "theme/style.css"));
        // the full copy is verbatim, not re-encoded
        assert_eq!(
            fs::read(dest.join("images/002-b.jpg")).unwrap(),
            b"source-bytes"
        );
        // staging is gone
        assert!(!h.staging().exists());
    }

    #[test]
    fn index_page_embeds_the_grid_cells() {
        let h = Harness::new(&["a.jpg", "b.jpg"]);
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        assert!(matches!(exporter.run(), Outcome::Completed));

        let index = fs::read_to_string(h.settings.destination.join("index.html")).unwrap();
        assert!(index.contains("<h1>Trip</h1>"));
        assert!(index.contains("thumbnails/001-a.thumb.jpg"));
        assert!(index.contains("pages/002-b.html"));
    }

    #[test]
    fn progress_events_cover_the_stages() {
        let h = Harness::new(&["a.jpg"]);
        let codec = MockCodec::new((800, 600));
        let (tx, rx) = std::sync::mpsc::channel();
        let outcome = {
            let mut exporter = Exporter::new(
                &h.settings,
                &codec,
                &FileMetadataSource,
                &LocalTransport,
                h.sources.clone(),
            )
            .with_progress(tx);
            exporter.run()
        };
        assert!(matches!(outcome, Outcome::Completed));

        let events: Vec<ProgressEvent> = rx.try_iter().collect();
        for stage in [Stage::Init, Stage::LoadImages, Stage::Cleanup] {
            assert!(
                events.contains(&ProgressEvent::StageStarted(stage)),
                "missing {stage:?} in {events:?}"
            );
        }
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Copy { .. })));
    }

    // =========================================================================
    // Degradation
    // =========================================================================

    #[test]
    fn undecodable_item_is_dropped_not_fatal() {
        let h = Harness::new(&["a.jpg", "broken.jpg", "c.jpg"]);
        let mut codec = MockCodec::new((800, 600));
        codec.fail_decode.insert("broken".to_string());
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        assert!(matches!(exporter.run(), Outcome::Completed));

        let dest = &h.settings.destination;
        assert!(exists(dest, "pages/001-a.html"));
        assert!(exists(dest, "pages/003-c.html"));
        assert!(!exists(dest, "pages/002-broken.html"));
        assert!(!exists(dest, "thumbnails/002-broken.thumb.jpg"));
        // surviving neighbors link around the dropped item
        let page = fs::read_to_string(dest.join("pages/001-a.html")).unwrap();
        assert!(!page.contains("002-broken"));
    }

    #[test]
    fn encode_failure_sweeps_the_items_earlier_renditions() {
        let h = Harness::new(&["a.jpg", "b.jpg"]);
        let mut codec = MockCodec::new((800, 600));
        // thumbnail encodes fine, the preview right after it fails
        codec.fail_encode.insert("002-b.preview".to_string());
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        assert!(matches!(exporter.run(), Outcome::Completed));

        // the thumbnail was actually written before the failure
        assert!(codec.get_operations().iter().any(|op| matches!(
            op,
            RecordedOp::Encode { file_name, .. } if file_name == "002-b.thumb.jpg"
        )));

        // but the dropped item publishes nothing at all
        let dest = &h.settings.destination;
        assert!(exists(dest, "thumbnails/001-a.thumb.jpg"));
        assert!(exists(dest, "pages/001-a.html"));
        assert!(!exists(dest, "thumbnails/002-b.thumb.jpg"));
        assert!(!exists(dest, "previews/002-b.preview.jpg"));
        assert!(!exists(dest, "images/002-b.jpg"));
        assert!(!exists(dest, "pages/002-b.html"));
        let index = fs::read_to_string(dest.join("index.html")).unwrap();
        assert!(!index.contains("002-b"));
    }

    #[test]
    fn preview_is_aliased_when_it_matches_the_full_size() {
        // 600x450 fits within the default 640 preview bound untouched
        let h = Harness::new(&["a.jpg"]);
        let codec = MockCodec::new((600, 450));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        assert!(matches!(exporter.run(), Outcome::Completed));

        let dest = &h.settings.destination;
        assert!(!exists(dest, "previews/001-a.preview.jpg"));
        // preview requests serve the full file instead
        let page = fs::read_to_string(dest.join("pages/001-a.html")).unwrap();
        assert!(page.contains("../images/001-a.jpg"));
    }

    #[test]
    fn missing_theme_fails_before_any_write() {
        let h = Harness::new(&["a.jpg"]);
        let mut settings = h.settings.clone();
        settings.theme_dir = h.staging().with_file_name("no-such-theme");
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        let outcome = exporter.run();
        assert!(matches!(
            outcome,
            Outcome::Failed(ExportError::Theme(ThemeError::Missing(_)))
        ));
        assert!(!settings.destination.exists());
        assert!(!h.staging().exists());
        // the codec was never consulted
        assert!(codec.get_operations().is_empty());
    }

    #[test]
    fn fatal_copy_error_surfaces_through_cleanup() {
        let h = Harness::new(&["a.jpg"]);
        // a plain file squats on the destination path, so the bulk copy
        // cannot create the directory
        fs::write(&h.settings.destination, "occupied").unwrap();
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        let outcome = exporter.run();
        assert!(matches!(
            outcome,
            Outcome::Failed(ExportError::Transport(TransportError::Io(_)))
        ));
        // the error routed through cleanup: staging is swept, the
        // squatting file untouched
        assert!(!h.staging().exists());
        assert_eq!(
            fs::read(&h.settings.destination).unwrap(),
            b"occupied"
        );
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    #[test]
    fn cancel_between_item_loads_stops_and_cleans_up() {
        let h = Harness::new(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        let cancel = exporter.cancel_flag();

        // step through Init..FetchMetadata, then two item loads
        while exporter.stage() != Stage::LoadImages {
            assert!(matches!(exporter.step(), StepResult::Running(_)));
        }
        assert!(matches!(exporter.step(), StepResult::Running(Stage::LoadImages)));
        assert!(matches!(exporter.step(), StepResult::Running(Stage::LoadImages)));
        cancel.request();

        let outcome = loop {
            match exporter.step() {
                StepResult::Running(_) => {}
                StepResult::Done(outcome) => break outcome,
            }
        };
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(!h.settings.destination.exists());
        assert!(!h.staging().exists());

        // items c and d were never decoded
        let decoded: Vec<String> = codec
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Decode { stem, .. } => Some(stem),
                _ => None,
            })
            .collect();
        assert!(decoded.iter().all(|s| s == "a" || s == "b"), "{decoded:?}");
    }

    // =========================================================================
    // Step granularity
    // =========================================================================

    #[test]
    fn render_stages_advance_one_page_per_step() {
        let mut h = Harness::new(&["a.jpg", "b.jpg", "c.jpg"]);
        h.settings.images_per_page = 1; // three index pages
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        let count = |dir: &str| {
            fs::read_dir(h.staging().join(dir))
                .map(|entries| entries.count())
                .unwrap_or(0)
        };

        while exporter.stage() != Stage::RenderImagePages {
            assert!(matches!(exporter.step(), StepResult::Running(_)));
        }
        assert_eq!(count("pages"), 0);
        for written in 1..=3 {
            assert!(matches!(
                exporter.step(),
                StepResult::Running(Stage::RenderImagePages)
            ));
            assert_eq!(count("pages"), written);
        }
        // hand-off step, no new page
        assert!(matches!(
            exporter.step(),
            StepResult::Running(Stage::RenderImagePages)
        ));
        assert_eq!(exporter.stage(), Stage::RenderIndexPages);

        assert!(!h.staging().join("index.html").exists());
        exporter.step();
        assert!(h.staging().join("index.html").exists());
        assert!(!h.staging().join("page2.html").exists());
        exporter.step();
        assert!(h.staging().join("page2.html").exists());
        assert!(!h.staging().join("page3.html").exists());
    }

    #[test]
    fn cancel_mid_render_stops_before_remaining_pages() {
        let h = Harness::new(&["a.jpg", "b.jpg", "c.jpg"]);
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        let cancel = exporter.cancel_flag();

        while exporter.stage() != Stage::RenderImagePages {
            assert!(matches!(exporter.step(), StepResult::Running(_)));
        }
        // one page renders, then the cancel lands between steps
        assert!(matches!(
            exporter.step(),
            StepResult::Running(Stage::RenderImagePages)
        ));
        cancel.request();
        assert!(matches!(exporter.step(), StepResult::Running(Stage::Cleanup)));
        // the remaining two image pages were never rendered
        assert_eq!(
            fs::read_dir(h.staging().join("pages")).unwrap().count(),
            1
        );

        let outcome = loop {
            match exporter.step() {
                StepResult::Running(_) => {}
                StepResult::Done(outcome) => break outcome,
            }
        };
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(!h.settings.destination.exists());
        assert!(!h.staging().exists());
    }

    #[test]
    fn cancel_during_destination_copy_reports_cancelled() {
        let h = Harness::new(&["a.jpg"]);
        let codec = MockCodec::new((800, 600));
        let mut exporter = Exporter::new(
            &h.settings,
            &codec,
            &FileMetadataSource,
            &LocalTransport,
            h.sources.clone(),
        );
        let cancel = exporter.cancel_flag();

        // run everything up to the destination copy, then cancel so the
        // flag is observed before the destination is touched
        while exporter.stage() != Stage::CopyToDestination {
            assert!(matches!(exporter.step(), StepResult::Running(_)));
        }
        cancel.request();
        let outcome = loop {
            match exporter.step() {
                StepResult::Running(_) => {}
                StepResult::Done(outcome) => break outcome,
            }
        };
        assert!(matches!(outcome, Outcome::Cancelled));
        assert!(!h.staging().exists());
    }
}

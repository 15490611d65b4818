//! Export job state.
//!
//! One [`ExportItem`] per selected photograph, one [`JobState`] per run.
//! The job value is passed explicitly into every pipeline step and
//! renderer call — there is no ambient mutable state, and its cursors are
//! only touched between the orchestrator's suspension points.
//!
//! Page layout math lives here as pure functions so pagination is testable
//! without any I/O.

use crate::codec::Bitmap;
use crate::metadata::AttributeMap;
use crate::paths::sanitize_stem;
use crate::settings::{ExportSettings, SizeClass, SortDirection, SortKey};
use std::cmp::Ordering;
use std::ops::Range;
use std::path::PathBuf;

/// One generated rendition of an item: its pixel size and, between the
/// load and save stages, the decoded bitmap.
#[derive(Debug, Clone)]
pub struct Rendition {
    pub width: u32,
    pub height: u32,
    pub bitmap: Option<Bitmap>,
}

impl Rendition {
    pub fn pending(bitmap: Bitmap) -> Rendition {
        Rendition {
            width: bitmap.width(),
            height: bitmap.height(),
            bitmap: Some(bitmap),
        }
    }

    /// A rendition whose file already exists or will be copied verbatim.
    pub fn sized(width: u32, height: u32) -> Rendition {
        Rendition {
            width,
            height,
            bitmap: None,
        }
    }
}

/// One source photograph and its computed renditions.
#[derive(Debug, Clone, Default)]
pub struct ExportItem {
    pub source: PathBuf,
    /// Sanitized, position-prefixed stem all generated names derive from.
    /// Assigned after the pre-pipeline sort.
    pub stem: String,
    pub attributes: AttributeMap,
    pub thumbnail: Option<Rendition>,
    /// `None` when the preview would equal the full rendition pixel for
    /// pixel; preview requests then resolve to the full rendition.
    pub preview: Option<Rendition>,
    pub full: Option<Rendition>,
    /// The full rendition is a verbatim copy of the source file.
    pub full_copied: bool,
    /// Extension of the full rendition file.
    pub full_ext: String,
    /// Decode or encode failed; the item contributes no image output.
    pub failed: bool,
}

impl ExportItem {
    pub fn new(source: PathBuf) -> ExportItem {
        ExportItem {
            source,
            ..Default::default()
        }
    }

    /// The concrete size class that serves a request, accounting for the
    /// preview-aliases-full case and for runs that keep no full copy.
    pub fn resolve_size(&self, size: SizeClass) -> Option<SizeClass> {
        match size {
            SizeClass::Thumbnail => self.thumbnail.as_ref().map(|_| SizeClass::Thumbnail),
            SizeClass::Preview => {
                if self.preview.is_some() {
                    Some(SizeClass::Preview)
                } else {
                    self.full.as_ref().map(|_| SizeClass::Full)
                }
            }
            SizeClass::Full => {
                if self.full.is_some() {
                    Some(SizeClass::Full)
                } else {
                    self.preview.as_ref().map(|_| SizeClass::Preview)
                }
            }
        }
    }

    /// The rendition for an already-resolved size class.
    pub fn rendition(&self, size: SizeClass) -> Option<&Rendition> {
        match size {
            SizeClass::Thumbnail => self.thumbnail.as_ref(),
            SizeClass::Preview => self.preview.as_ref(),
            SizeClass::Full => self.full.as_ref(),
        }
    }

    /// A non-empty caption attribute value.
    pub fn caption(&self, field: &str) -> Option<&str> {
        self.attributes
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn raw_stem(&self) -> String {
        self.source
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Pagination geometry for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub page_count: u32,
    pub images_per_page: u32,
    pub columns: u32,
    pub rows_per_page: u32,
    pub single_index: bool,
}

/// Page counts from item count and settings. A single unpaginated index
/// folds the page size up to the item count.
pub fn compute_layout(item_count: usize, settings: &ExportSettings) -> PageLayout {
    let n = item_count as u32;
    let columns = settings.columns.max(1);
    let images_per_page = if settings.single_index {
        n.max(1)
    } else {
        settings.images_per_page.max(1)
    };
    let page_count = if settings.single_index {
        1
    } else {
        n.div_ceil(images_per_page).max(1)
    };
    PageLayout {
        page_count,
        images_per_page,
        columns,
        rows_per_page: images_per_page.div_ceil(columns),
        single_index: settings.single_index,
    }
}

impl PageLayout {
    /// Index page an image lands on.
    pub fn page_for_image(&self, image_index: usize) -> u32 {
        if self.single_index {
            0
        } else {
            image_index as u32 / self.images_per_page
        }
    }

    /// Item index range shown on a page.
    pub fn page_range(&self, page: u32, item_count: usize) -> Range<usize> {
        let start = (page as usize) * self.images_per_page as usize;
        let end = (start + self.images_per_page as usize).min(item_count);
        start.min(item_count)..end
    }
}

/// Global job state threaded through the pipeline and the renderer.
#[derive(Debug, Default)]
pub struct JobState {
    pub items: Vec<ExportItem>,
    pub layout: Option<PageLayout>,
    pub current_item: usize,
    pub current_page: u32,
}

/// The one pre-pipeline sort, run before any per-item I/O. Stable, so
/// equal keys keep selection order.
pub fn sort_items(items: &mut [ExportItem], key: &SortKey, direction: SortDirection) {
    let compare: Box<dyn Fn(&ExportItem, &ExportItem) -> Ordering> = match key {
        SortKey::None => return,
        SortKey::Name => Box::new(|a, b| a.file_name().cmp(&b.file_name())),
        SortKey::Attribute(attr) => {
            let attr = attr.clone();
            Box::new(move |a, b| {
                let av = a.attributes.get(&attr).map(String::as_str).unwrap_or("");
                let bv = b.attributes.get(&attr).map(String::as_str).unwrap_or("");
                av.cmp(bv).then_with(|| a.file_name().cmp(&b.file_name()))
            })
        }
    };
    items.sort_by(|a, b| {
        let ord = compare(a, b);
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
}

/// Assign position-prefixed stems in final order. Must run after
/// [`sort_items`] so prefixes reflect album order.
pub fn assign_stems(items: &mut [ExportItem]) {
    for (i, item) in items.iter_mut().enumerate() {
        item.stem = format!("{:03}-{}", i + 1, sanitize_stem(&item.raw_stem()));
    }
}

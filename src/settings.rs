//! Export settings.
//!
//! [`ExportSettings`] collects every knob the exporter honors: theme and
//! destination locations, pagination geometry, rendition sizes, output
//! format, destination layout, captions and sort order. The host
//! application normally builds this struct directly; the CLI can also load
//! it from a TOML file.
//!
//! All fields have defaults, and a settings file is sparse — override just
//! the values you want:
//!
//! ```toml
//! theme_dir = "themes/slate"
//! destination = "/var/www/album"
//! images_per_page = 12
//! columns = 3
//! caption_fields = "name,comment"
//! sort_by = "name"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The three rendition size classes an image tag can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Thumbnail,
    Preview,
    Full,
}

/// Comparator used for the one pre-pipeline sort of the item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Keep the selection order.
    None,
    /// Sort by source file name.
    Name,
    /// Sort by a metadata attribute value (string comparison).
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Encoding format for generated renditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputImageFormat {
    Jpeg,
    Png,
}

impl OutputImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputImageFormat::Jpeg => "jpg",
            OutputImageFormat::Png => "png",
        }
    }
}

/// Subdirectory names under the album root. Ignored entirely when
/// `use_subfolders` is off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubdirNames {
    pub thumbnails: String,
    pub previews: String,
    pub images: String,
    pub pages: String,
    pub theme: String,
}

impl Default for SubdirNames {
    fn default() -> Self {
        Self {
            thumbnails: "thumbnails".to_string(),
            previews: "previews".to_string(),
            images: "images".to_string(),
            pages: "pages".to_string(),
            theme: "theme".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Directory holding the three template files plus static assets.
    pub theme_dir: PathBuf,
    /// Directory the finished album is copied to.
    pub destination: PathBuf,
    /// Staging directory override. Defaults to a per-process directory
    /// under the system temp dir.
    pub staging_dir: Option<PathBuf>,

    pub album_title: String,
    /// Header text; falls back to `album_title` when empty.
    pub header: String,
    /// Footer text for index pages.
    pub footer: String,
    /// Footer text for per-image pages; `footer` is used when unset.
    pub image_page_footer: Option<String>,

    /// File name of the first index page.
    pub front_page_name: String,
    pub images_per_page: u32,
    pub columns: u32,
    /// Fold all images onto one unpaginated index.
    pub single_index: bool,
    /// Free-flowing thumbnail sequence instead of a fixed rows×columns grid.
    pub adapt_to_width: bool,

    /// Longer-edge bound for thumbnails, in pixels.
    pub thumbnail_size: u32,
    /// Longer-edge bound for previews, in pixels.
    pub preview_size: u32,
    /// Copy the full-size image into the album.
    pub copy_originals: bool,
    /// Resize full-size copies to this longer-edge bound; `None` copies
    /// the original file verbatim.
    pub resize_originals_to: Option<u32>,
    pub output_format: OutputImageFormat,
    /// Lossy encoding quality, 1-100.
    pub quality: u8,

    pub use_subfolders: bool,
    pub subdirs: SubdirNames,

    /// Comma-separated metadata fields rendered by caption loops.
    pub caption_fields: String,
    pub sort_by: SortKey,
    pub sort_direction: SortDirection,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            theme_dir: PathBuf::from("theme"),
            destination: PathBuf::from("album"),
            staging_dir: None,
            album_title: "Photo album".to_string(),
            header: String::new(),
            footer: String::new(),
            image_page_footer: None,
            front_page_name: "index.html".to_string(),
            images_per_page: 16,
            columns: 4,
            single_index: false,
            adapt_to_width: false,
            thumbnail_size: 128,
            preview_size: 640,
            copy_originals: true,
            resize_originals_to: None,
            output_format: OutputImageFormat::Jpeg,
            quality: 85,
            use_subfolders: true,
            subdirs: SubdirNames::default(),
            caption_fields: "comment".to_string(),
            sort_by: SortKey::Name,
            sort_direction: SortDirection::Ascending,
        }
    }
}

impl ExportSettings {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// The configured caption fields, split and trimmed, empty entries
    /// dropped.
    pub fn caption_field_list(&self) -> Vec<String> {
        self.caption_fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect()
    }
}

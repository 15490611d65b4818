//! Per-file metadata for captions and sorting.
//!
//! The exporter does not own a metadata database; it asks a
//! [`MetadataSource`] collaborator once, in bulk, for exactly the
//! attributes the run needs (the standard set plus whatever the configured
//! captions and sort key reference). The host application normally
//! supplies its own implementation backed by its catalog.
//!
//! [`FileMetadataSource`] is the bundled filesystem implementation:
//!
//! - `name` — display title derived from the file stem; a numeric
//!   `NNN-` ordering prefix is stripped and dashes become spaces
//!   (`001-My-Museum.jpg` → "My Museum")
//! - `path` — the source path as typed
//! - `size` — file size in bytes
//! - `comment` — contents of a sidecar text file with the same stem
//!   (`001-My-Museum.txt` next to the image), trimmed
//!
//! A file that cannot be inspected simply contributes fewer attributes;
//! bulk fetch itself only fails on backend errors, never on a missing
//! sidecar.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Attribute name → value for one file.
pub type AttributeMap = BTreeMap<String, String>;

/// Attributes fetched for every run, independent of theme and captions.
pub const STANDARD_ATTRIBUTES: &[&str] = &["name", "path", "size", "comment"];

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata backend failed: {0}")]
    Backend(String),
}

/// Bulk attribute lookup for a set of files.
pub trait MetadataSource {
    /// Fetch the requested attributes for each file. Files the source
    /// knows nothing about may be absent from the result; attributes with
    /// no value are omitted from their map.
    fn fetch(
        &self,
        files: &[PathBuf],
        attributes: &[String],
    ) -> Result<HashMap<PathBuf, AttributeMap>, MetadataError>;
}

/// Filesystem-backed metadata: file stem, size, and sidecar comments.
pub struct FileMetadataSource;

impl MetadataSource for FileMetadataSource {
    fn fetch(
        &self,
        files: &[PathBuf],
        attributes: &[String],
    ) -> Result<HashMap<PathBuf, AttributeMap>, MetadataError> {
        let mut result = HashMap::with_capacity(files.len());
        for file in files {
            let mut map = AttributeMap::new();
            for attr in attributes {
                if let Some(value) = file_attribute(file, attr) {
                    map.insert(attr.clone(), value);
                }
            }
            result.insert(file.clone(), map);
        }
        Ok(result)
    }
}

fn file_attribute(file: &Path, attribute: &str) -> Option<String> {
    match attribute {
        "name" => {
            let stem = file.file_stem()?.to_str()?;
            Some(display_name(stem))
        }
        "path" => Some(file.to_string_lossy().into_owned()),
        "size" => std::fs::metadata(file).ok().map(|m| m.len().to_string()),
        "comment" => read_sidecar(file),
        _ => None,
    }
}

/// Display title for a file stem: strip a numeric `NNN-` ordering prefix
/// if present, then turn dashes into spaces.
pub fn display_name(stem: &str) -> String {
    let rest = match stem.split_once('-') {
        Some((prefix, rest)) if prefix.parse::<u32>().is_ok() && !rest.is_empty() => rest,
        _ => stem,
    };
    rest.replace('-', " ")
}

/// Read a sidecar `.txt` file for an image.
///
/// Given `album/001-photo.jpg`, looks for `album/001-photo.txt` and
/// returns its trimmed contents. `None` if the file is absent or empty.
pub fn read_sidecar(image_path: &Path) -> Option<String> {
    let sidecar = image_path.with_extension("txt");
    std::fs::read_to_string(sidecar)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // =========================================================================
    // display_name
    // =========================================================================

    #[test]
    fn display_name_strips_prefix_and_dashes() {
        assert_eq!(display_name("001-My-Museum"), "My Museum");
        assert_eq!(display_name("020-dawn"), "dawn");
    }

    #[test]
    fn display_name_without_prefix() {
        assert_eq!(display_name("city-lights"), "city lights");
        assert_eq!(display_name("dawn"), "dawn");
    }

    #[test]
    fn display_name_number_only() {
        // no name part to promote, keep as-is
        assert_eq!(display_name("001"), "001");
    }

    // =========================================================================
    // Sidecar
    // =========================================================================

    #[test]
    fn sidecar_read_and_trimmed() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("001-a.jpg");
        fs::write(&img, "").unwrap();
        fs::write(tmp.path().join("001-a.txt"), "  Dusk over the bay \n").unwrap();
        assert_eq!(read_sidecar(&img), Some("Dusk over the bay".to_string()));
    }

    #[test]
    fn sidecar_missing_or_empty() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("001-a.jpg");
        fs::write(&img, "").unwrap();
        assert_eq!(read_sidecar(&img), None);
        fs::write(tmp.path().join("001-a.txt"), "   \n").unwrap();
        assert_eq!(read_sidecar(&img), None);
    }

    // =========================================================================
    // Bulk fetch
    // =========================================================================

    #[test]
    fn fetch_requested_attributes_only() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("001-dawn.jpg");
        fs::write(&img, "xx").unwrap();
        fs::write(tmp.path().join("001-dawn.txt"), "First light").unwrap();

        let source = FileMetadataSource;
        let attrs = vec!["name".to_string(), "comment".to_string()];
        let result = source.fetch(std::slice::from_ref(&img), &attrs).unwrap();

        let map = &result[&img];
        assert_eq!(map.get("name").map(String::as_str), Some("dawn"));
        assert_eq!(map.get("comment").map(String::as_str), Some("First light"));
        assert!(!map.contains_key("size"));
    }

    #[test]
    fn fetch_omits_valueless_attributes() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("b.jpg");
        fs::write(&img, "abc").unwrap();

        let source = FileMetadataSource;
        let attrs: Vec<String> = ["name", "comment", "size", "exposure"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let result = source.fetch(std::slice::from_ref(&img), &attrs).unwrap();

        let map = &result[&img];
        assert_eq!(map.get("size").map(String::as_str), Some("3"));
        assert!(!map.contains_key("comment"));
        assert!(!map.contains_key("exposure"));
    }
}

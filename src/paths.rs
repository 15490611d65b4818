//! Destination layout and file naming.
//!
//! Every generated file gets an album-root-relative path (forward slashes)
//! computed here, both for writing into the staging directory and for
//! linking between pages. Rendition and page names derive from a
//! position-prefixed, sanitized source stem (`001-dawn.thumb.jpg`,
//! `001-dawn.html`), which keeps names unique even when two selected
//! images share a stem.
//!
//! With `use_subfolders` off, every subdirectory name collapses and the
//! whole album lands flat in the destination root.

use crate::settings::ExportSettings;

/// Computes album-root-relative paths for one export.
#[derive(Debug, Clone)]
pub struct AlbumPaths {
    use_subfolders: bool,
    thumbnails: String,
    previews: String,
    images: String,
    pages: String,
    theme: String,
    front_page_name: String,
    rendition_ext: &'static str,
}

impl AlbumPaths {
    pub fn new(settings: &ExportSettings) -> Self {
        Self {
            use_subfolders: settings.use_subfolders,
            thumbnails: settings.subdirs.thumbnails.clone(),
            previews: settings.subdirs.previews.clone(),
            images: settings.subdirs.images.clone(),
            pages: settings.subdirs.pages.clone(),
            theme: settings.subdirs.theme.clone(),
            front_page_name: settings.front_page_name.clone(),
            rendition_ext: settings.output_format.extension(),
        }
    }

    fn placed(&self, subdir: &str, name: String) -> String {
        if self.use_subfolders && !subdir.is_empty() {
            format!("{subdir}/{name}")
        } else {
            name
        }
    }

    pub fn thumbnail_rel(&self, stem: &str) -> String {
        self.placed(
            &self.thumbnails,
            format!("{stem}.thumb.{}", self.rendition_ext),
        )
    }

    pub fn preview_rel(&self, stem: &str) -> String {
        self.placed(
            &self.previews,
            format!("{stem}.preview.{}", self.rendition_ext),
        )
    }

    /// The full rendition keeps the source extension when copied verbatim,
    /// so the extension is the caller's.
    pub fn full_rel(&self, stem: &str, ext: &str) -> String {
        self.placed(&self.images, format!("{stem}.{ext}"))
    }

    pub fn image_page_rel(&self, stem: &str) -> String {
        self.placed(&self.pages, format!("{stem}.html"))
    }

    /// Index pages always sit in the album root: the front page keeps its
    /// configured name, later pages follow the fixed `page<N>` pattern
    /// (the second page is `page2.html`).
    pub fn index_page_rel(&self, page: u32) -> String {
        if page == 0 {
            self.front_page_name.clone()
        } else {
            format!("page{}.html", page + 1)
        }
    }

    /// Location of a copied theme asset, given its path relative to the
    /// theme directory.
    pub fn theme_rel(&self, asset: &str) -> String {
        self.placed(&self.theme, asset.to_string())
    }

    /// URL for `to` as seen from the page at `from`; both are
    /// album-root-relative.
    pub fn relative_url(from_page: &str, to: &str) -> String {
        let from_parts: Vec<&str> = from_page.split('/').collect();
        let to_parts: Vec<&str> = to.split('/').collect();
        // drop the page's file name, keep its directory
        let from_dirs = &from_parts[..from_parts.len() - 1];
        let common = from_dirs
            .iter()
            .zip(to_parts.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let mut url = String::new();
        for _ in common..from_dirs.len() {
            url.push_str("../");
        }
        url.push_str(&to_parts[common..].join("/"));
        url
    }
}

const MAX_STEM_LEN: usize = 80;

/// Sanitize a source file stem for use in URLs and generated file names.
///
/// - Replaces non-alphanumeric characters (except dashes) with dashes
/// - Collapses consecutive dashes and strips leading/trailing ones
/// - Truncates to a reasonable length, breaking at a dash when possible
pub fn sanitize_stem(stem: &str) -> String {
    let mut collapsed = String::with_capacity(stem.len());
    let mut prev_dash = false;
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() { c } else { '-' };
        if c == '-' {
            if !prev_dash {
                collapsed.push('-');
            }
            prev_dash = true;
        } else {
            collapsed.push(c);
            prev_dash = false;
        }
    }
    let trimmed = collapsed.trim_matches('-');
    let out = if trimmed.len() <= MAX_STEM_LEN {
        trimmed.to_string()
    } else {
        let truncated = &trimmed[..MAX_STEM_LEN];
        match truncated.rfind('-') {
            Some(pos) => truncated[..pos].to_string(),
            None => truncated.to_string(),
        }
    };
    if out.is_empty() { "image".to_string() } else { out }
}

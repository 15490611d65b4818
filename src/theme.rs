//! Theme loading.
//!
//! A theme is a directory holding up to three template files (one per
//! [`Role`]) plus any number of static assets (stylesheets, background
//! images) that are copied into the album verbatim. Loading parses each
//! template once; a missing or malformed template file degrades to the
//! role's built-in fallback layout with a warning, so a broken theme never
//! aborts an export and every role always has a usable document.
//!
//! Only a missing or unreadable theme directory is fatal.

use crate::template::{Document, Role, parse_document};
use log::warn;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ThemeError {
    #[error("theme directory not found: {0}")]
    Missing(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// A loaded theme: one parsed document per role plus its static assets.
#[derive(Debug)]
pub struct Theme {
    pub index: Document,
    pub image_page: Document,
    pub thumbnail_cell: Document,
    /// Asset paths relative to the theme directory, forward slashes.
    pub assets: Vec<String>,
    dir: PathBuf,
}

impl Theme {
    /// Load and parse a theme directory.
    pub fn load(dir: &Path) -> Result<Theme, ThemeError> {
        if !dir.is_dir() {
            return Err(ThemeError::Missing(dir.to_path_buf()));
        }
        Ok(Theme {
            index: load_role(dir, Role::Index),
            image_page: load_role(dir, Role::ImagePage),
            thumbnail_cell: load_role(dir, Role::ThumbnailCell),
            assets: collect_assets(dir)?,
            dir: dir.to_path_buf(),
        })
    }

    pub fn document(&self, role: Role) -> &Document {
        match role {
            Role::Index => &self.index,
            Role::ImagePage => &self.image_page,
            Role::ThumbnailCell => &self.thumbnail_cell,
        }
    }

    /// Absolute path of an asset listed in [`Theme::assets`].
    pub fn asset_path(&self, asset: &str) -> PathBuf {
        self.dir.join(asset)
    }

    /// Parse problems worth reporting without loading bitmaps or writing
    /// anything. Returns one message per template file that would degrade
    /// to its fallback.
    pub fn check(dir: &Path) -> Result<Vec<String>, ThemeError> {
        if !dir.is_dir() {
            return Err(ThemeError::Missing(dir.to_path_buf()));
        }
        let mut problems = Vec::new();
        for role in [Role::Index, Role::ImagePage, Role::ThumbnailCell] {
            let file = dir.join(role.template_file());
            match std::fs::read_to_string(&file) {
                Ok(text) => {
                    if let Err(e) = parse_document(&text) {
                        problems.push(format!("{}: {e}", role.template_file()));
                    }
                }
                Err(_) => problems.push(format!(
                    "{}: missing, {} layout will use the built-in fallback",
                    role.template_file(),
                    role.label()
                )),
            }
        }
        Ok(problems)
    }
}

fn load_role(dir: &Path, role: Role) -> Document {
    let file = dir.join(role.template_file());
    let text = match std::fs::read_to_string(&file) {
        Ok(text) => text,
        Err(_) => {
            warn!(
                "theme has no {}, using the built-in {} layout",
                role.template_file(),
                role.label()
            );
            return Document::fallback(role);
        }
    };
    match parse_document(&text) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                "theme {} is malformed ({e}), using the built-in {} layout",
                role.template_file(),
                role.label()
            );
            Document::fallback(role)
        }
    }
}

/// Inventory the theme's static assets: every regular file except the
/// template files themselves, dotfiles, and editor leftovers.
fn collect_assets(dir: &Path) -> Result<Vec<String>, ThemeError> {
    let templates = [
        Role::Index.template_file(),
        Role::ImagePage.template_file(),
        Role::ThumbnailCell.template_file(),
    ];
    let mut assets = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy();
        if templates.contains(&name.as_ref())
            || name.starts_with('.')
            || name.ends_with('~')
            || name.ends_with(".bak")
        {
            continue;
        }
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        assets.push(rel);
    }
    assets.sort();
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Tag;
    use std::fs;
    use tempfile::TempDir;

    fn write_theme(dir: &Path, index: &str, image: &str, thumb: &str) {
        fs::write(dir.join("index.tmpl"), index).unwrap();
        fs::write(dir.join("image.tmpl"), image).unwrap();
        fs::write(dir.join("thumbnail.tmpl"), thumb).unwrap();
    }

    #[test]
    fn loads_all_three_roles() {
        let tmp = TempDir::new().unwrap();
        write_theme(
            tmp.path(),
            "<html><!--album:header --></html>",
            "<!--album:image size=\"preview\" -->",
            "<!--album:image size=\"thumbnail\" -->",
        );
        let theme = Theme::load(tmp.path()).unwrap();
        assert!(
            theme
                .index
                .tags
                .iter()
                .any(|t| matches!(t, Tag::Header))
        );
        assert!(theme.assets.is_empty());
    }

    #[test]
    fn missing_directory_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("nope");
        assert!(matches!(
            Theme::load(&gone),
            Err(ThemeError::Missing(p)) if p == gone
        ));
    }

    #[test]
    fn missing_template_falls_back() {
        let tmp = TempDir::new().unwrap();
        // only the index template exists
        fs::write(tmp.path().join("index.tmpl"), "<p>hi</p>").unwrap();
        let theme = Theme::load(tmp.path()).unwrap();
        assert_eq!(
            theme.index.tags,
            vec![Tag::Text("<p>hi</p>".to_string())]
        );
        // fallbacks are non-trivial documents
        assert!(!theme.image_page.tags.is_empty());
        assert!(!theme.thumbnail_cell.tags.is_empty());
    }

    #[test]
    fn malformed_template_falls_back() {
        let tmp = TempDir::new().unwrap();
        write_theme(
            tmp.path(),
            "<!--album:if cond={page_index > 1} -->never closed",
            "ok",
            "ok",
        );
        let theme = Theme::load(tmp.path()).unwrap();
        assert_eq!(theme.index.tags, Document::fallback(Role::Index).tags);
        assert_eq!(theme.image_page.tags, vec![Tag::Text("ok".to_string())]);
    }

    #[test]
    fn assets_exclude_templates_and_leftovers() {
        let tmp = TempDir::new().unwrap();
        write_theme(tmp.path(), "a", "b", "c");
        fs::create_dir(tmp.path().join("img")).unwrap();
        fs::write(tmp.path().join("style.css"), "body{}").unwrap();
        fs::write(tmp.path().join("img/bg.png"), "png").unwrap();
        fs::write(tmp.path().join(".hidden"), "x").unwrap();
        fs::write(tmp.path().join("style.css~"), "x").unwrap();
        fs::write(tmp.path().join("old.bak"), "x").unwrap();

        let theme = Theme::load(tmp.path()).unwrap();
        assert_eq!(theme.assets, vec!["img/bg.png", "style.css"]);
        assert!(theme.asset_path("style.css").is_file());
    }

    #[test]
    fn check_reports_each_degrading_template() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("index.tmpl"),
            "<!--album:if cond={1} -->no endif",
        )
        .unwrap();
        fs::write(tmp.path().join("image.tmpl"), "fine").unwrap();

        let problems = Theme::check(tmp.path()).unwrap();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("index.tmpl:"));
        assert!(problems[1].starts_with("thumbnail.tmpl:"));
    }
}

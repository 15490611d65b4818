//! Document rendering.
//!
//! A [`Renderer`] turns parsed template documents into finished HTML for
//! one job: index pages (with the thumbnail grid expanded through the
//! theme's cell document) and per-image pages. Output streams through any
//! [`io::Write`] sink; the first sink error stops the current document
//! and is returned, leaving bytes already written for earlier documents
//! untouched. The orchestrator decides whether that aborts the job.
//!
//! The language is lenient at render time: an unknown substitution name,
//! an unresolvable link, or a tag that is illegal for the current role
//! logs a warning and contributes nothing (links degrade to `"#"`). Only
//! the theme author sees the warnings; viewers see a complete page.
//!
//! ## Substitution names
//!
//! | Name | Value |
//! |---|---|
//! | `album_title` | configured album title |
//! | `page_index`, `page_count` | 1-based index page position |
//! | `image_index`, `image_count` | 1-based item position |
//! | `images_per_page`, `columns`, `rows_per_page` | grid geometry |
//! | `thumbnail_size`, `preview_size` | configured pixel bounds |
//! | `*_width`, `*_height` | current item rendition dimensions |
//! | `field_name`, `field_value`, `field_index`, `field_first`, `field_last` | inside a field loop |
//! | anything else | item attribute (HTML-escaped; numeric in expressions) |

use crate::job::{ExportItem, PageLayout};
use crate::paths::AlbumPaths;
use crate::settings::{ExportSettings, SizeClass};
use crate::template::{Document, LinkTarget, MaxSize, Resolver, Role, Tag};
use log::warn;
use std::io::{self, Write};

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders the pages of one export job.
pub struct Renderer<'a> {
    settings: &'a ExportSettings,
    paths: &'a AlbumPaths,
    layout: PageLayout,
    items: &'a [ExportItem],
    thumbnail_cell: &'a Document,
}

/// Loop state while rendering a field loop body.
struct FieldScope {
    name: String,
    value: String,
    index: usize,
    count: usize,
}

/// Everything a document sees while rendering: the page it is on and,
/// when present, the current item and field-loop state. Doubles as the
/// expression [`Resolver`].
struct Scope<'a> {
    r: &'a Renderer<'a>,
    role: Role,
    /// Album-root-relative path of the page being rendered.
    from_page: String,
    page: u32,
    item_index: Option<usize>,
    field: Option<FieldScope>,
}

impl<'a> Renderer<'a> {
    pub fn new(
        settings: &'a ExportSettings,
        paths: &'a AlbumPaths,
        layout: PageLayout,
        items: &'a [ExportItem],
        thumbnail_cell: &'a Document,
    ) -> Renderer<'a> {
        Renderer {
            settings,
            paths,
            layout,
            items,
            thumbnail_cell,
        }
    }

    /// Render one index page into the sink.
    pub fn render_index_page(
        &self,
        doc: &Document,
        page: u32,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let scope = Scope {
            r: self,
            role: Role::Index,
            from_page: self.paths.index_page_rel(page),
            page,
            item_index: None,
            field: None,
        };
        self.render_document(doc, &scope, out)
    }

    /// Render the page for one item into the sink.
    pub fn render_image_page(
        &self,
        doc: &Document,
        image_index: usize,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let item = &self.items[image_index];
        let scope = Scope {
            r: self,
            role: Role::ImagePage,
            from_page: self.paths.image_page_rel(&item.stem),
            page: self.layout.page_for_image(image_index),
            item_index: Some(image_index),
            field: None,
        };
        self.render_document(doc, &scope, out)
    }

    fn render_document(
        &self,
        doc: &Document,
        scope: &Scope,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        for tag in &doc.tags {
            self.render_tag(tag, scope, out)?;
        }
        Ok(())
    }

    fn render_tag(&self, tag: &Tag, scope: &Scope, out: &mut dyn Write) -> io::Result<()> {
        match tag {
            Tag::Text(text) => out.write_all(text.as_bytes()),
            Tag::Value { name } => out.write_all(scope.lookup_text(name).as_bytes()),
            Tag::Image { size, max, class } => self.render_image(*size, max, class, scope, out),
            Tag::Link { target } => out.write_all(scope.link_url(*target).as_bytes()),
            Tag::Header => {
                let text = if self.settings.header.is_empty() {
                    &self.settings.album_title
                } else {
                    &self.settings.header
                };
                out.write_all(escape_html(text).as_bytes())
            }
            Tag::Footer => {
                let text = match scope.role {
                    Role::ImagePage => self
                        .settings
                        .image_page_footer
                        .as_deref()
                        .unwrap_or(self.settings.footer.as_str()),
                    _ => self.settings.footer.as_str(),
                };
                out.write_all(escape_html(text).as_bytes())
            }
            Tag::Grid => {
                if scope.role == Role::Index {
                    self.render_grid(scope, out)
                } else {
                    warn!("grid tag outside an index template, skipped");
                    Ok(())
                }
            }
            Tag::Condition { branches } => {
                for (expr, body) in branches {
                    if expr.truthy(scope) {
                        return self.render_document(body, scope, out);
                    }
                }
                Ok(())
            }
            Tag::FieldLoop { fields, body } => self.render_field_loop(fields, body, scope, out),
        }
    }

    fn render_image(
        &self,
        size: SizeClass,
        max: &Option<MaxSize>,
        class: &Option<String>,
        scope: &Scope,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let Some(item) = scope.item() else {
            warn!("image tag without a current image, skipped");
            return Ok(());
        };
        let Some(resolved) = item.resolve_size(size) else {
            warn!("no {size:?} rendition for {}, image tag skipped", item.stem);
            return Ok(());
        };
        let Some(rendition) = item.rendition(resolved) else {
            return Ok(());
        };
        let mut dims = (rendition.width, rendition.height);
        if let Some(max) = max {
            let bound = match max {
                MaxSize::Fixed(px) => *px,
                MaxSize::Computed(expr) => {
                    let v = expr.eval(scope);
                    if v <= 0 {
                        warn!("computed image bound evaluated to {v}, ignored");
                        0
                    } else {
                        v.min(u32::MAX as i64) as u32
                    }
                }
            };
            if bound > 0 {
                dims = crate::codec::fit_within(dims, bound);
            }
        }
        let src = AlbumPaths::relative_url(&scope.from_page, &self.rendition_rel(item, resolved));
        let alt = item
            .attributes
            .get("name")
            .map(String::as_str)
            .unwrap_or(&item.stem);
        write!(
            out,
            "<img src=\"{}\" width=\"{}\" height=\"{}\" alt=\"{}\"",
            src,
            dims.0,
            dims.1,
            escape_html(alt)
        )?;
        if let Some(class) = class {
            write!(out, " class=\"{}\"", escape_html(class))?;
        }
        out.write_all(b" />")
    }

    /// The fixed grid emits every row of every page, padding the trailing
    /// page with filler cells so all pages share one geometry. The
    /// adapt-to-width mode emits the cells as a plain sequence and leaves
    /// wrapping to the browser.
    fn render_grid(&self, scope: &Scope, out: &mut dyn Write) -> io::Result<()> {
        let range = self.layout.page_range(scope.page, self.items.len());
        if self.settings.adapt_to_width {
            for idx in range {
                self.render_cell(idx, scope, out)?;
                out.write_all(b"\n")?;
            }
            return Ok(());
        }
        let columns = self.layout.columns as usize;
        let mut slots = range;
        for _ in 0..self.layout.rows_per_page {
            out.write_all(b"<tr>\n")?;
            for _ in 0..columns {
                match slots.next() {
                    Some(idx) => {
                        out.write_all(b"<td>")?;
                        self.render_cell(idx, scope, out)?;
                        out.write_all(b"</td>\n")?;
                    }
                    None => out.write_all(b"<td class=\"filler\"></td>\n")?,
                }
            }
            out.write_all(b"</tr>\n")?;
        }
        Ok(())
    }

    fn render_cell(&self, item_index: usize, scope: &Scope, out: &mut dyn Write) -> io::Result<()> {
        let cell_scope = Scope {
            r: self,
            role: Role::ThumbnailCell,
            from_page: scope.from_page.clone(),
            page: scope.page,
            item_index: Some(item_index),
            field: None,
        };
        self.render_document(self.thumbnail_cell, &cell_scope, out)
    }

    fn render_field_loop(
        &self,
        fields: &Option<String>,
        body: &Document,
        scope: &Scope,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let Some(item) = scope.item() else {
            warn!("field loop without a current image, skipped");
            return Ok(());
        };
        let names: Vec<String> = match fields {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect(),
            None => self.settings.caption_field_list(),
        };
        let present: Vec<(&String, String)> = names
            .iter()
            .filter_map(|n| item.caption(n).map(|v| (n, v.to_string())))
            .collect();
        let count = present.len();
        for (index, (name, value)) in present.into_iter().enumerate() {
            let loop_scope = Scope {
                r: self,
                role: scope.role,
                from_page: scope.from_page.clone(),
                page: scope.page,
                item_index: scope.item_index,
                field: Some(FieldScope {
                    name: name.clone(),
                    value,
                    index,
                    count,
                }),
            };
            self.render_document(body, &loop_scope, out)?;
        }
        Ok(())
    }

    /// Album-root-relative path of an item's rendition file.
    fn rendition_rel(&self, item: &ExportItem, size: SizeClass) -> String {
        match size {
            SizeClass::Thumbnail => self.paths.thumbnail_rel(&item.stem),
            SizeClass::Preview => self.paths.preview_rel(&item.stem),
            SizeClass::Full => self.paths.full_rel(&item.stem, &item.full_ext),
        }
    }
}

impl Scope<'_> {
    fn item(&self) -> Option<&ExportItem> {
        self.item_index.map(|i| &self.r.items[i])
    }

    /// Text for a `value` substitution. Counters and settings come through
    /// verbatim; attribute and field text is escaped.
    fn lookup_text(&self, name: &str) -> String {
        if name == "album_title" {
            return escape_html(&self.r.settings.album_title);
        }
        if let Some(field) = &self.field {
            match name {
                "field_name" => return escape_html(&field.name),
                "field_value" => return escape_html(&field.value),
                _ => {}
            }
        }
        if let Some(v) = self.counter(name) {
            return v.to_string();
        }
        if let Some(item) = self.item()
            && let Some(v) = item.attributes.get(name)
        {
            return escape_html(v);
        }
        warn!("unknown substitution `{name}`, rendered empty");
        String::new()
    }

    /// Numeric renderer variables shared by text substitution and the
    /// expression resolver. 1-based where they count positions.
    fn counter(&self, name: &str) -> Option<i64> {
        let layout = &self.r.layout;
        let v = match name {
            "page_index" => self.page as i64 + 1,
            "page_count" => layout.page_count as i64,
            "image_index" => self.item_index? as i64 + 1,
            "image_count" => self.r.items.len() as i64,
            "images_per_page" => layout.images_per_page as i64,
            "columns" => layout.columns as i64,
            "rows_per_page" => layout.rows_per_page as i64,
            "thumbnail_size" => self.r.settings.thumbnail_size as i64,
            "preview_size" => self.r.settings.preview_size as i64,
            "field_index" => self.field.as_ref()?.index as i64 + 1,
            "field_count" => self.field.as_ref()?.count as i64,
            "field_first" => (self.field.as_ref()?.index == 0) as i64,
            "field_last" => {
                let f = self.field.as_ref()?;
                (f.index + 1 == f.count) as i64
            }
            "thumbnail_width" => self.rendition_dim(SizeClass::Thumbnail)?.0,
            "thumbnail_height" => self.rendition_dim(SizeClass::Thumbnail)?.1,
            "preview_width" => self.rendition_dim(SizeClass::Preview)?.0,
            "preview_height" => self.rendition_dim(SizeClass::Preview)?.1,
            "full_width" => self.rendition_dim(SizeClass::Full)?.0,
            "full_height" => self.rendition_dim(SizeClass::Full)?.1,
            _ => return None,
        };
        Some(v)
    }

    fn rendition_dim(&self, size: SizeClass) -> Option<(i64, i64)> {
        let item = self.item()?;
        let resolved = item.resolve_size(size)?;
        let r = item.rendition(resolved)?;
        Some((r.width as i64, r.height as i64))
    }

    /// Page-relative URL for a link target, `"#"` when the target does not
    /// exist from here (first/last boundaries, missing renditions).
    fn link_url(&self, target: LinkTarget) -> String {
        let layout = &self.r.layout;
        let rel = match target {
            LinkTarget::Index => Some(self.r.paths.index_page_rel(self.page)),
            LinkTarget::PrevPage => self
                .page
                .checked_sub(1)
                .map(|p| self.r.paths.index_page_rel(p)),
            LinkTarget::NextPage => {
                let next = self.page + 1;
                (next < layout.page_count).then(|| self.r.paths.index_page_rel(next))
            }
            LinkTarget::PrevImage => self
                .item_index
                .and_then(|i| i.checked_sub(1))
                .map(|i| self.r.paths.image_page_rel(&self.r.items[i].stem)),
            LinkTarget::NextImage => self
                .item_index
                .map(|i| i + 1)
                .filter(|&i| i < self.r.items.len())
                .map(|i| self.r.paths.image_page_rel(&self.r.items[i].stem)),
            LinkTarget::ImagePage => self
                .item()
                .map(|item| self.r.paths.image_page_rel(&item.stem)),
            LinkTarget::FullImage => self.item().and_then(|item| {
                item.resolve_size(SizeClass::Full)
                    .map(|size| self.r.rendition_rel(item, size))
            }),
        };
        match rel {
            Some(rel) => AlbumPaths::relative_url(&self.from_page, &rel),
            None => {
                warn!("link target {target:?} unresolvable here, rendered as #");
                "#".to_string()
            }
        }
    }
}

impl Resolver for Scope<'_> {
    fn value_of(&self, name: &str) -> Option<i64> {
        self.counter(name).or_else(|| {
            self.item()
                .and_then(|item| item.attributes.get(name))
                .and_then(|v| v.trim().parse().ok())
        })
    }

    fn is_available(&self, attribute: &str) -> bool {
        self.item()
            .is_some_and(|item| item.caption(attribute).is_some())
    }
}

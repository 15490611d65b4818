//! Template document tree.
//!
//! A [`Document`] is an ordered sequence of [`Tag`]s; conditional branches
//! and loop bodies are themselves documents, so the whole thing is a tree.
//! The tag set is closed — the renderer matches exhaustively, and a
//! directive the parser does not recognize never reaches the AST.
//!
//! Each template role has a built-in fallback document
//! ([`Document::fallback`]) used when the theme file for that role is
//! missing or malformed, so an export always has something to render with.

use super::expr::{Expr, Op};
use crate::settings::SizeClass;

/// Which of the three theme templates is being parsed or rendered. The
/// role gates which tags are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Index,
    ImagePage,
    ThumbnailCell,
}

impl Role {
    /// File name of this role's template inside a theme directory.
    pub fn template_file(self) -> &'static str {
        match self {
            Role::Index => "index.tmpl",
            Role::ImagePage => "image.tmpl",
            Role::ThumbnailCell => "thumbnail.tmpl",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Index => "index",
            Role::ImagePage => "image page",
            Role::ThumbnailCell => "thumbnail cell",
        }
    }
}

/// Target of a `link` tag. The tag emits a page-relative URL only; themes
/// wrap it in their own anchor markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    /// The index page containing the current image (or the current index
    /// page itself).
    Index,
    PrevPage,
    NextPage,
    PrevImage,
    NextImage,
    /// The current item's per-image page.
    ImagePage,
    /// The current item's largest rendition.
    FullImage,
}

impl LinkTarget {
    pub fn from_name(name: &str) -> Option<LinkTarget> {
        Some(match name {
            "index" => LinkTarget::Index,
            "prev_page" => LinkTarget::PrevPage,
            "next_page" => LinkTarget::NextPage,
            "prev_image" => LinkTarget::PrevImage,
            "next_image" => LinkTarget::NextImage,
            "image_page" => LinkTarget::ImagePage,
            "full_image" => LinkTarget::FullImage,
            _ => return None,
        })
    }
}

/// Pixel bound for an image tag, either fixed or computed per render.
#[derive(Debug, Clone, PartialEq)]
pub enum MaxSize {
    Fixed(u32),
    Computed(Expr),
}

/// One directive node.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    /// A literal run of theme text, written through verbatim.
    Text(String),
    /// Substitution of a counter, renderer variable, or item attribute.
    /// Attribute text is HTML-escaped on output.
    Value { name: String },
    /// An `<img>` element for one rendition, fitted within `max`.
    Image {
        size: SizeClass,
        max: Option<MaxSize>,
        class: Option<String>,
    },
    /// A page-relative URL.
    Link { target: LinkTarget },
    /// Configured header text (album title when unset).
    Header,
    /// Configured footer text; differs between index and image pages.
    Footer,
    /// The thumbnail grid. Index pages only.
    Grid,
    /// Ordered branches; the first whose expression is true renders its
    /// sub-document, no match renders nothing.
    Condition { branches: Vec<(Expr, Document)> },
    /// Body rendered once per caption field that has a value for the
    /// current item.
    FieldLoop {
        /// Comma-separated override of the configured field list.
        fields: Option<String>,
        body: Document,
    },
}

/// A parsed template: an ordered tag sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub tags: Vec<Tag>,
}

impl Document {
    /// The minimal built-in document for a role, used when the theme file
    /// is missing or fails to parse.
    pub fn fallback(role: Role) -> Document {
        match role {
            Role::Index => fallback_index(),
            Role::ImagePage => fallback_image_page(),
            Role::ThumbnailCell => fallback_thumbnail_cell(),
        }
    }
}

fn text(s: &str) -> Tag {
    Tag::Text(s.to_string())
}

fn value(name: &str) -> Tag {
    Tag::Value {
        name: name.to_string(),
    }
}

fn cond(expr_ops: Vec<Op>, tags: Vec<Tag>) -> Tag {
    Tag::Condition {
        branches: vec![(Expr::from_ops(expr_ops), Document { tags })],
    }
}

fn var(name: &str) -> Op {
    Op::Var(name.to_string())
}

fn fallback_index() -> Document {
    Document {
        tags: vec![
            text("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>"),
            value("album_title"),
            text("</title></head>\n<body>\n<h1>"),
            Tag::Header,
            text("</h1>\n<table>\n"),
            Tag::Grid,
            text("</table>\n<p>"),
            cond(
                vec![var("page_index"), Op::Push(1), Op::Gt],
                vec![
                    text("<a href=\""),
                    Tag::Link {
                        target: LinkTarget::PrevPage,
                    },
                    text("\">&laquo; previous</a> "),
                ],
            ),
            cond(
                vec![var("page_index"), var("page_count"), Op::Lt],
                vec![
                    text("<a href=\""),
                    Tag::Link {
                        target: LinkTarget::NextPage,
                    },
                    text("\">next &raquo;</a>"),
                ],
            ),
            text("</p>\n<p>"),
            Tag::Footer,
            text("</p>\n</body>\n</html>\n"),
        ],
    }
}

fn fallback_image_page() -> Document {
    Document {
        tags: vec![
            text("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>"),
            value("name"),
            text("</title></head>\n<body>\n<p>"),
            cond(
                vec![var("image_index"), Op::Push(1), Op::Gt],
                vec![
                    text("<a href=\""),
                    Tag::Link {
                        target: LinkTarget::PrevImage,
                    },
                    text("\">&laquo;</a> "),
                ],
            ),
            text("<a href=\""),
            Tag::Link {
                target: LinkTarget::Index,
            },
            text("\">index</a>"),
            cond(
                vec![var("image_index"), var("image_count"), Op::Lt],
                vec![
                    text(" <a href=\""),
                    Tag::Link {
                        target: LinkTarget::NextImage,
                    },
                    text("\">&raquo;</a>"),
                ],
            ),
            text("</p>\n<div><a href=\""),
            Tag::Link {
                target: LinkTarget::FullImage,
            },
            text("\">"),
            Tag::Image {
                size: SizeClass::Preview,
                max: None,
                class: None,
            },
            text("</a></div>\n"),
            Tag::FieldLoop {
                fields: None,
                body: Document {
                    tags: vec![
                        text("<p class=\"caption\">"),
                        value("field_value"),
                        text("</p>\n"),
                    ],
                },
            },
            text("<p>"),
            Tag::Footer,
            text("</p>\n</body>\n</html>\n"),
        ],
    }
}

fn fallback_thumbnail_cell() -> Document {
    Document {
        tags: vec![
            text("<a href=\""),
            Tag::Link {
                target: LinkTarget::ImagePage,
            },
            text("\">"),
            Tag::Image {
                size: SizeClass::Thumbnail,
                max: None,
                class: None,
            },
            text("</a>"),
        ],
    }
}

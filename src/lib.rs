//! # webalbum
//!
//! A batch exporter that turns a selection of photographs into a static
//! HTML album: thumbnails, previews, paginated index pages, and one page
//! per image, all styled by a pluggable theme.
//!
//! # Architecture: Build in Staging, Publish Once
//!
//! An export runs as a cooperative pipeline that assembles the whole
//! album in a local staging directory, then hands it to a transport as a
//! single bulk copy:
//!
//! ```text
//! 1. Prepare   theme + metadata  →  parsed templates, sorted items
//! 2. Images    sources           →  thumbnails / previews / full copies
//! 3. Render    templates + items →  index pages, per-image pages
//! 4. Publish   staging           →  destination (one bulk copy)
//! ```
//!
//! This separation exists for three reasons:
//!
//! - **Atomic publishing**: a previously published album is never left
//!   half-overwritten; the destination only changes in the final copy.
//! - **Cancellation**: the pipeline advances in small steps and checks a
//!   shared flag between them, so a host UI can abort cleanly at any
//!   point and staging is always swept.
//! - **Testability**: image codecs, metadata, and the destination sit
//!   behind traits, so the whole pipeline runs under test with recording
//!   mocks and a temp directory.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`settings`] | Every export knob, with TOML loading for the CLI |
//! | [`template`] | The theme language: lexer/parser, AST, expression evaluator |
//! | [`theme`] | Theme directory loading, per-role fallbacks, asset inventory |
//! | [`render`] | Documents + job state → finished HTML |
//! | [`job`] | Per-item state, sorting, page layout math |
//! | [`paths`] | Destination layout, file naming, relative URLs |
//! | [`metadata`] | Bulk attribute fetch behind [`metadata::MetadataSource`] |
//! | [`codec`] | Decode/scale/encode behind [`codec::ImageCodec`] |
//! | [`transport`] | Bulk destination copy behind [`transport::Transport`] |
//! | [`pipeline`] | The cancelable export state machine |
//!
//! # Design Decisions
//!
//! ## Lenient Theme Language
//!
//! Themes are written by hand, and a typo in one directive should not
//! cost a photographer their export. Unknown directives, arguments, and
//! substitution names log a warning and render as nothing; unresolvable
//! links degrade to `#`; unknown expression variables evaluate to zero.
//! Only malformed syntax is a parse error, and even that only swaps the
//! offending template for its built-in fallback layout. A missing theme
//! directory is the one theme problem that aborts a run.
//!
//! ## Cooperative, Single-Threaded Pipeline
//!
//! The exporter is a state machine driven by [`pipeline::Exporter::step`]
//! rather than a thread pool: hosts embed it in their own event loop,
//! progress reporting is a plain mpsc channel, and cancellation is a
//! shared atomic flag checked between steps. Image work is per-item, so
//! memory holds at most one item's bitmaps at a time.
//!
//! ## Pure-Rust Imaging
//!
//! [`codec::RasterCodec`] uses the `image` crate for everything — decode,
//! Lanczos3 resampling, JPEG/PNG encoding. No system ImageMagick, no
//! version conflicts; the binary is self-contained.

pub mod codec;
pub mod job;
pub mod metadata;
pub mod paths;
pub mod pipeline;
pub mod render;
pub mod settings;
pub mod template;
pub mod theme;
pub mod transport;

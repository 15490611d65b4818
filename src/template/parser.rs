//! Theme template parser.
//!
//! Templates are ordinary HTML with directives written as HTML comments,
//! so an unprocessed theme file still previews in a browser:
//!
//! ```text
//! <h1><!--album:header --></h1>
//! <!--album:if cond={available(comment)} -->
//!   <p><!--album:value name="comment" --></p>
//! <!--album:endif -->
//! <table><!--album:grid --></table>
//! ```
//!
//! Argument values take three forms: a quoted string (`name="comment"`),
//! an integer (`max=320`), or a braced expression (`max={preview_width / 2}`).
//!
//! Degradation policy: unknown directive names and unknown argument names
//! warn and are skipped — nothing a theme author types can abort an
//! export. Only malformed syntax (unterminated directive or string,
//! unclosed block, bad expression) is a [`ParseError`], and the caller
//! recovers that per role with [`Document::fallback`].

use super::ast::{Document, LinkTarget, MaxSize, Tag};
use super::expr::{Expr, ExprError};
use crate::settings::SizeClass;
use log::warn;
use thiserror::Error;

/// Opens every directive.
pub const TAG_OPEN: &str = "<!--album:";
const TAG_CLOSE: &str = "-->";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unterminated directive at offset {0}")]
    UnterminatedTag(usize),
    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),
    #[error("expected identifier at offset {0}")]
    ExpectedIdent(usize),
    #[error("expected `=` after argument `{0}`")]
    ExpectedEquals(String),
    #[error("invalid integer argument `{0}`")]
    BadInt(String),
    #[error("`{0}` block is missing its `{1}`")]
    UnclosedBlock(&'static str, &'static str),
    #[error("stray `{0}` directive")]
    StrayClose(String),
    #[error("invalid expression: {0}")]
    Expr(#[from] ExprError),
}

/// Parse a whole template file into a [`Document`].
pub fn parse_document(src: &str) -> Result<Document, ParseError> {
    let mut scanner = Scanner { src, pos: 0 };
    let (doc, terminator) = parse_block(&mut scanner, &[])?;
    debug_assert!(terminator.is_none());
    Ok(doc)
}

// ============================================================================
// Piece scanner — splits the source into literal runs and raw directives
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum ArgValue {
    Str(String),
    Int(i64),
    Expr(Expr),
}

#[derive(Debug)]
struct Directive {
    name: String,
    args: Vec<(String, ArgValue)>,
}

enum Piece<'a> {
    Text(&'a str),
    Directive(Directive),
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn next_piece(&mut self) -> Result<Option<Piece<'a>>, ParseError> {
        if self.pos >= self.src.len() {
            return Ok(None);
        }
        let rest = &self.src[self.pos..];
        match rest.find(TAG_OPEN) {
            Some(0) => {
                self.pos += TAG_OPEN.len();
                Ok(Some(Piece::Directive(self.directive()?)))
            }
            Some(off) => {
                let run = &rest[..off];
                self.pos += off;
                Ok(Some(Piece::Text(run)))
            }
            None => {
                self.pos = self.src.len();
                Ok(Some(Piece::Text(rest)))
            }
        }
    }

    fn skip_ws(&mut self) {
        while self
            .src
            .as_bytes()
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::ExpectedIdent(start));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    /// Parse the body of a directive; `pos` sits just past [`TAG_OPEN`].
    fn directive(&mut self) -> Result<Directive, ParseError> {
        let open_at = self.pos;
        self.skip_ws();
        let name = self.ident()?;
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            let rest = &self.src[self.pos..];
            if rest.is_empty() {
                return Err(ParseError::UnterminatedTag(open_at));
            }
            if rest.starts_with(TAG_CLOSE) {
                self.pos += TAG_CLOSE.len();
                return Ok(Directive { name, args });
            }
            let key = self.ident()?;
            self.skip_ws();
            if self.src.as_bytes().get(self.pos) != Some(&b'=') {
                return Err(ParseError::ExpectedEquals(key));
            }
            self.pos += 1;
            self.skip_ws();
            let value = self.arg_value()?;
            args.push((key, value));
        }
    }

    fn arg_value(&mut self) -> Result<ArgValue, ParseError> {
        let start = self.pos;
        match self.src.as_bytes().get(self.pos) {
            Some(b'"') => {
                self.pos += 1;
                let rest = &self.src[self.pos..];
                let end = rest
                    .find('"')
                    .ok_or(ParseError::UnterminatedString(start))?;
                let s = rest[..end].to_string();
                self.pos += end + 1;
                Ok(ArgValue::Str(s))
            }
            Some(b'{') => {
                self.pos += 1;
                let rest = &self.src[self.pos..];
                let end = rest.find('}').ok_or(ParseError::UnterminatedTag(start))?;
                let expr = Expr::parse(&rest[..end])?;
                self.pos += end + 1;
                Ok(ArgValue::Expr(expr))
            }
            _ => {
                let bytes = self.src.as_bytes();
                let mut end = self.pos;
                if bytes.get(end) == Some(&b'-') {
                    end += 1;
                }
                while bytes.get(end).is_some_and(|b| b.is_ascii_digit()) {
                    end += 1;
                }
                let lit = &self.src[self.pos..end];
                let n: i64 = lit
                    .parse()
                    .map_err(|_| ParseError::BadInt(lit.to_string()))?;
                self.pos = end;
                Ok(ArgValue::Int(n))
            }
        }
    }
}

// ============================================================================
// Block parser — raw directives to the closed tag set
// ============================================================================

/// Directive names that close a block rather than open a tag.
const CLOSERS: &[&str] = &["elif", "else", "endif", "endfields"];

/// Parse tags until end of input or one of `until` closes the block.
/// Returns the closing directive so `if`/`elif` chains can read its
/// arguments.
fn parse_block(
    scanner: &mut Scanner<'_>,
    until: &[&str],
) -> Result<(Document, Option<Directive>), ParseError> {
    let mut tags = Vec::new();
    while let Some(piece) = scanner.next_piece()? {
        match piece {
            Piece::Text(run) => {
                if !run.is_empty() {
                    tags.push(Tag::Text(run.to_string()));
                }
            }
            Piece::Directive(d) => {
                if until.contains(&d.name.as_str()) {
                    return Ok((Document { tags }, Some(d)));
                }
                if CLOSERS.contains(&d.name.as_str()) {
                    return Err(ParseError::StrayClose(d.name));
                }
                if let Some(tag) = directive_to_tag(d, scanner)? {
                    tags.push(tag);
                }
            }
        }
    }
    Ok((Document { tags }, None))
}

fn directive_to_tag(
    d: Directive,
    scanner: &mut Scanner<'_>,
) -> Result<Option<Tag>, ParseError> {
    let mut args = Args::new(&d.name, d.args);
    let tag = match d.name.as_str() {
        "value" => match args.take_str("name") {
            Some(name) => Some(Tag::Value { name }),
            None => {
                warn!("`value` directive without a `name` argument, skipping");
                None
            }
        },
        "image" => {
            let size = match args.take_str("size").as_deref() {
                Some("thumbnail") => SizeClass::Thumbnail,
                Some("full") => SizeClass::Full,
                Some("preview") | None => SizeClass::Preview,
                Some(other) => {
                    warn!("unknown image size `{other}`, using preview");
                    SizeClass::Preview
                }
            };
            let max = match args.take("max") {
                Some(ArgValue::Int(n)) if n > 0 => Some(MaxSize::Fixed(n as u32)),
                Some(ArgValue::Int(n)) => {
                    warn!("image `max={n}` is not positive, ignoring");
                    None
                }
                Some(ArgValue::Expr(e)) => Some(MaxSize::Computed(e)),
                Some(ArgValue::Str(s)) => {
                    warn!("image `max` must be an integer or expression, got \"{s}\"");
                    None
                }
                None => None,
            };
            let class = args.take_str("class");
            Some(Tag::Image { size, max, class })
        }
        "link" => match args.take_str("target").as_deref().map(LinkTarget::from_name) {
            Some(Some(target)) => Some(Tag::Link { target }),
            Some(None) => {
                warn!("unknown link target, skipping `link` directive");
                None
            }
            None => {
                warn!("`link` directive without a `target` argument, skipping");
                None
            }
        },
        "header" => Some(Tag::Header),
        "footer" => Some(Tag::Footer),
        "grid" => Some(Tag::Grid),
        "if" => {
            let tag = parse_condition(args.take_cond(), scanner)?;
            args.finish();
            return Ok(Some(tag));
        }
        "fields" => {
            let fields = args.take_str("list");
            let (body, terminator) = parse_block(scanner, &["endfields"])?;
            if terminator.is_none() {
                return Err(ParseError::UnclosedBlock("fields", "endfields"));
            }
            Some(Tag::FieldLoop { fields, body })
        }
        other => {
            warn!("unknown directive `{other}`, skipping");
            None
        }
    };
    args.finish();
    Ok(tag)
}

/// Parse the branch chain of an `if` whose condition is `first`.
fn parse_condition(first: Expr, scanner: &mut Scanner<'_>) -> Result<Tag, ParseError> {
    let mut branches = Vec::new();
    let mut cond = first;
    loop {
        let (body, terminator) = parse_block(scanner, &["elif", "else", "endif"])?;
        let terminator = terminator.ok_or(ParseError::UnclosedBlock("if", "endif"))?;
        branches.push((cond, body));
        match terminator.name.as_str() {
            "endif" => return Ok(Tag::Condition { branches }),
            "elif" => {
                let mut args = Args::new("elif", terminator.args);
                cond = args.take_cond();
                args.finish();
            }
            "else" => {
                let (body, terminator) = parse_block(scanner, &["endif"])?;
                if terminator.is_none() {
                    return Err(ParseError::UnclosedBlock("else", "endif"));
                }
                branches.push((Expr::literal(1), body));
                return Ok(Tag::Condition { branches });
            }
            _ => unreachable!("parse_block only returns requested closers"),
        }
    }
}

/// Named-argument accessor that warns about anything left unconsumed.
struct Args {
    directive: String,
    args: Vec<(String, ArgValue)>,
}

impl Args {
    fn new(directive: &str, args: Vec<(String, ArgValue)>) -> Self {
        Self {
            directive: directive.to_string(),
            args,
        }
    }

    fn take(&mut self, key: &str) -> Option<ArgValue> {
        let idx = self.args.iter().position(|(k, _)| k == key)?;
        Some(self.args.remove(idx).1)
    }

    fn take_str(&mut self, key: &str) -> Option<String> {
        match self.take(key)? {
            ArgValue::Str(s) => Some(s),
            ArgValue::Int(n) => Some(n.to_string()),
            ArgValue::Expr(_) => {
                warn!(
                    "`{}` argument `{key}` must be a literal, ignoring expression",
                    self.directive
                );
                None
            }
        }
    }

    /// The `cond` argument of `if`/`elif`. A missing or malformed
    /// condition degrades to constant false, so the branch never fires.
    fn take_cond(&mut self) -> Expr {
        match self.take("cond") {
            Some(ArgValue::Expr(e)) => e,
            Some(ArgValue::Int(n)) => Expr::literal(n),
            Some(ArgValue::Str(s)) => {
                warn!("`cond` must be an expression, got \"{s}\"; branch disabled");
                Expr::literal(0)
            }
            None => {
                warn!("`{}` directive without `cond`; branch disabled", self.directive);
                Expr::literal(0)
            }
        }
    }

    fn finish(self) {
        for (key, _) in &self.args {
            warn!("unknown argument `{key}` on `{}` directive", self.directive);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::expr::tests::MapResolver;

    fn parse(src: &str) -> Document {
        parse_document(src).unwrap()
    }

    // =========================================================================
    // Literal runs and simple tags
    // =========================================================================

    #[test]
    fn plain_html_is_one_literal() {
        let doc = parse("<html><body>hi</body></html>");
        assert_eq!(
            doc.tags,
            vec![Tag::Text("<html><body>hi</body></html>".to_string())]
        );
    }

    #[test]
    fn empty_input_is_empty_document() {
        assert!(parse("").tags.is_empty());
    }

    #[test]
    fn literal_and_value_interleave() {
        let doc = parse("<p><!--album:value name=\"comment\" --></p>");
        assert_eq!(
            doc.tags,
            vec![
                Tag::Text("<p>".to_string()),
                Tag::Value {
                    name: "comment".to_string()
                },
                Tag::Text("</p>".to_string()),
            ]
        );
    }

    #[test]
    fn image_tag_arguments() {
        let doc = parse("<!--album:image size=\"thumbnail\" max=160 class=\"thumb\" -->");
        assert_eq!(
            doc.tags,
            vec![Tag::Image {
                size: SizeClass::Thumbnail,
                max: Some(MaxSize::Fixed(160)),
                class: Some("thumb".to_string()),
            }]
        );
    }

    #[test]
    fn image_max_expression() {
        let doc = parse("<!--album:image size=\"preview\" max={preview_width / 2} -->");
        match &doc.tags[0] {
            Tag::Image {
                max: Some(MaxSize::Computed(e)),
                ..
            } => {
                let r = MapResolver::with_vars(&[("preview_width", 640)]);
                assert_eq!(e.eval(&r), 320);
            }
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn link_grid_header_footer() {
        let doc = parse(
            "<!--album:header --><!--album:grid --><!--album:link target=\"next_page\" --><!--album:footer -->",
        );
        assert_eq!(doc.tags.len(), 4);
        assert!(matches!(doc.tags[0], Tag::Header));
        assert!(matches!(doc.tags[1], Tag::Grid));
        assert!(matches!(
            doc.tags[2],
            Tag::Link {
                target: LinkTarget::NextPage
            }
        ));
        assert!(matches!(doc.tags[3], Tag::Footer));
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    #[test]
    fn if_elif_else_chain() {
        let doc = parse(
            "<!--album:if cond={image_index == 1} -->first\
             <!--album:elif cond={image_index == 2} -->second\
             <!--album:else -->rest<!--album:endif -->",
        );
        let Tag::Condition { branches } = &doc.tags[0] else {
            panic!("expected condition");
        };
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[0].1.tags, vec![Tag::Text("first".to_string())]);
        assert_eq!(branches[1].1.tags, vec![Tag::Text("second".to_string())]);
        assert_eq!(branches[2].0, Expr::literal(1));
        assert_eq!(branches[2].1.tags, vec![Tag::Text("rest".to_string())]);
    }

    #[test]
    fn nested_conditions() {
        let doc = parse(
            "<!--album:if cond={1} --><!--album:if cond={0} -->inner\
             <!--album:endif --><!--album:endif -->",
        );
        let Tag::Condition { branches } = &doc.tags[0] else {
            panic!("expected condition");
        };
        assert!(matches!(branches[0].1.tags[0], Tag::Condition { .. }));
    }

    #[test]
    fn fields_loop_with_override() {
        let doc = parse(
            "<!--album:fields list=\"name,comment\" --><dt><!--album:value name=\"field_name\" --></dt><!--album:endfields -->",
        );
        let Tag::FieldLoop { fields, body } = &doc.tags[0] else {
            panic!("expected field loop");
        };
        assert_eq!(fields.as_deref(), Some("name,comment"));
        assert_eq!(body.tags.len(), 3);
    }

    // =========================================================================
    // Lenient degradation
    // =========================================================================

    #[test]
    fn unknown_directive_is_skipped() {
        let doc = parse("a<!--album:sparkle level=9 -->b");
        assert_eq!(
            doc.tags,
            vec![Tag::Text("a".to_string()), Tag::Text("b".to_string())]
        );
    }

    #[test]
    fn unknown_argument_is_ignored() {
        let doc = parse("<!--album:grid wobble=\"yes\" -->");
        assert_eq!(doc.tags, vec![Tag::Grid]);
    }

    #[test]
    fn value_without_name_is_skipped() {
        let doc = parse("<!--album:value -->");
        assert!(doc.tags.is_empty());
    }

    #[test]
    fn if_without_cond_never_fires() {
        let doc = parse("<!--album:if -->x<!--album:endif -->");
        let Tag::Condition { branches } = &doc.tags[0] else {
            panic!("expected condition");
        };
        assert_eq!(branches[0].0, Expr::literal(0));
    }

    // =========================================================================
    // Errors and idempotence
    // =========================================================================

    #[test]
    fn unterminated_directive_is_an_error() {
        assert!(matches!(
            parse_document("<!--album:value name=\"x\" "),
            Err(ParseError::UnterminatedTag(_))
        ));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(matches!(
            parse_document("<!--album:value name=\"x -->"),
            Err(ParseError::UnterminatedString(_))
        ));
    }

    #[test]
    fn unclosed_if_is_an_error() {
        assert!(matches!(
            parse_document("<!--album:if cond={1} -->body"),
            Err(ParseError::UnclosedBlock("if", "endif"))
        ));
    }

    #[test]
    fn stray_endif_is_an_error() {
        assert!(matches!(
            parse_document("x<!--album:endif -->"),
            Err(ParseError::StrayClose(_))
        ));
    }

    #[test]
    fn bad_expression_is_an_error() {
        assert!(matches!(
            parse_document("<!--album:if cond={1 +} -->x<!--album:endif -->"),
            Err(ParseError::Expr(_))
        ));
    }

    #[test]
    fn parse_is_idempotent() {
        let src = "<h1><!--album:header --></h1>\
                   <!--album:if cond={page_index > 1} --><!--album:link target=\"prev_page\" --><!--album:endif -->\
                   <table><!--album:grid --></table>";
        assert_eq!(parse(src), parse(src));
    }
}

//! Markdown stripping for spoken output
//!
//! A fixed sequence of independent substitutions, not a markdown parser.
//! Order matters: earlier patterns remove material that later patterns
//! would otherwise misread (e.g. `#` inside a code fence).

use std::sync::LazyLock;

use regex::Regex;

static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]*`").expect("valid regex"));

static IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static BULLET_GLYPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([ \t]*)[•◦▪▫‣⁃●○■□∙]").expect("valid regex"));

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").expect("valid regex"));

static BLOCKQUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:>[ \t]?)+").expect("valid regex"));

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+[.)])[ \t]+").expect("valid regex"));

static HORIZONTAL_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$").expect("valid regex"));

static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Strip markdown syntax so the text reads naturally when spoken
///
/// Lossy: code is dropped entirely, images and links keep only their
/// visible text, structural markers vanish. Runs of three or more newlines
/// collapse to a single paragraph break and the result is trimmed.
#[must_use]
pub fn normalize(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = FENCED_CODE.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "");
    let text = IMAGE.replace_all(&text, "$1");
    let text = LINK.replace_all(&text, "$1");
    let text = BULLET_GLYPH.replace_all(&text, "${1}-");
    let text = HEADING.replace_all(&text, "");
    let text = BLOCKQUOTE.replace_all(&text, "");
    let text = LIST_ITEM.replace_all(&text, "");
    let text = HORIZONTAL_RULE.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");

    text.trim().to_string()
}

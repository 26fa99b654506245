// ============================================================================
// MARKUP SANITIZATION GATE - allowlist cleanup of CMS-delivered SVG
// ============================================================================
//
// Runs once per image load, before markup is mounted as the colorable
// surface. Output is rebuilt from tokens, never patched in place: only
// allowlisted elements and attributes are re-emitted, denylisted elements are
// dropped together with their content, and everything outside the first
// `<svg>` root is discarded.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::Serialize;

use crate::error::{EngineError, Result};

/// Structural and presentational SVG elements, in their canonical spelling.
const ALLOWED_TAGS: &[&str] = &[
    "svg",
    "g",
    "path",
    "rect",
    "circle",
    "ellipse",
    "line",
    "polyline",
    "polygon",
    "defs",
    "linearGradient",
    "radialGradient",
    "stop",
    "text",
    "tspan",
    "title",
    "desc",
    "use",
    "symbol",
    "clipPath",
];

/// Elements dropped together with everything inside them.
const DENIED_TAGS: &[&str] = &[
    "script",
    "style",
    "object",
    "embed",
    "link",
    "foreignobject",
    "iframe",
    "animate",
    "set",
    "animatetransform",
    "animatemotion",
];

const ALLOWED_ATTRS: &[&str] = &[
    "id",
    "class",
    "xmlns",
    "xmlns:xlink",
    "version",
    "viewBox",
    "preserveAspectRatio",
    "width",
    "height",
    "x",
    "y",
    "x1",
    "y1",
    "x2",
    "y2",
    "cx",
    "cy",
    "r",
    "rx",
    "ry",
    "fx",
    "fy",
    "dx",
    "dy",
    "d",
    "points",
    "transform",
    "fill",
    "fill-opacity",
    "fill-rule",
    "clip-rule",
    "clip-path",
    "clipPathUnits",
    "stroke",
    "stroke-width",
    "stroke-opacity",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-miterlimit",
    "opacity",
    "visibility",
    "display",
    "offset",
    "stop-color",
    "stop-opacity",
    "gradientUnits",
    "gradientTransform",
    "spreadMethod",
    "font-family",
    "font-size",
    "font-weight",
    "font-style",
    "text-anchor",
    "dominant-baseline",
    "href",
    "xlink:href",
];

/// Elements that count as fillable regions.
const COLORABLE_TAGS: &[&str] = &["path", "rect", "circle", "ellipse", "polygon"];

/// Attribute that names a region explicitly; falls back to `id`.
pub const REGION_ID_ATTR: &str = "data-region-id";

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[.*?\]\]>").expect("cdata regex"));
static PI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<\?.*?\?>").expect("processing instruction regex"));
static DOCTYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<!DOCTYPE(?:[^\[>]|\[.*?\])*>").expect("doctype regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<(/?)([A-Za-z][A-Za-z0-9:._-]*)((?:\s+[^\s=/>]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))?)*)\s*(/?)>"#,
    )
    .expect("tag regex")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([^\s=/>]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#)
        .expect("attribute regex")
});

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Open {
        name: &'a str,
        attrs: Vec<(&'a str, &'a str)>,
        self_closing: bool,
    },
    Close {
        name: &'a str,
    },
    Text(&'a str),
}

fn strip_markup_noise(markup: &str) -> String {
    let s = COMMENT_RE.replace_all(markup, "");
    let s = CDATA_RE.replace_all(&s, "");
    let s = PI_RE.replace_all(&s, "");
    DOCTYPE_RE.replace_all(&s, "").into_owned()
}

fn tokenize(markup: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in TAG_RE.captures_iter(markup) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            tokens.push(Token::Text(&markup[last..whole.start()]));
        }
        last = whole.end();

        let name = caps.get(2).map_or("", |m| m.as_str());
        if caps.get(1).is_some_and(|m| !m.as_str().is_empty()) {
            tokens.push(Token::Close { name });
            continue;
        }
        let attrs = caps
            .get(3)
            .map(|m| {
                ATTR_RE
                    .captures_iter(m.as_str())
                    .filter_map(|a| {
                        let key = a.get(1)?.as_str();
                        let value = a
                            .get(2)
                            .or_else(|| a.get(3))
                            .or_else(|| a.get(4))
                            .map_or("", |v| v.as_str());
                        Some((key, value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let self_closing = caps.get(4).is_some_and(|m| !m.as_str().is_empty());
        tokens.push(Token::Open {
            name,
            attrs,
            self_closing,
        });
    }
    if last < markup.len() {
        tokens.push(Token::Text(&markup[last..]));
    }
    tokens
}

fn canonical_tag(name: &str) -> Option<&'static str> {
    ALLOWED_TAGS
        .iter()
        .copied()
        .find(|t| t.eq_ignore_ascii_case(name))
}

fn is_denied_tag(name: &str) -> bool {
    DENIED_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// Canonical attribute name if the attribute survives, `None` otherwise.
fn clean_attr<'a>(name: &'a str, value: &str) -> Option<&'a str> {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("on") || lower == "style" {
        return None;
    }
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.contains("javascript:") || compact.contains("expression(") {
        return None;
    }
    if lower == "href" || lower == "xlink:href" {
        // Local fragment references only.
        if !value.trim_start().starts_with('#') {
            return None;
        }
    }
    if lower.starts_with("data-") {
        return Some(name);
    }
    ALLOWED_ATTRS
        .iter()
        .copied()
        .find(|a| a.eq_ignore_ascii_case(name))
        .map(|_| name)
}

fn escape_text(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Clean `markup` down to a single allowlisted `<svg>` tree.
///
/// Fails with `InvalidMarkup` when no `<svg>` root survives the cleanup.
pub fn sanitize(markup: &str) -> Result<String> {
    let cleaned = strip_markup_noise(markup);
    let tokens = tokenize(&cleaned);

    let mut out = String::with_capacity(cleaned.len());
    // Open kept elements, innermost last. Empty until the svg root opens.
    let mut open: Vec<&'static str> = Vec::new();
    // (denied element name, nesting depth) while skipping its content.
    let mut skipping: Option<(&str, usize)> = None;
    let mut root_done = false;
    let mut dropped = 0usize;

    for token in tokens {
        if let Some((skip_name, depth)) = skipping {
            match token {
                Token::Open { name, self_closing: false, .. } if name.eq_ignore_ascii_case(skip_name) => {
                    skipping = Some((skip_name, depth + 1));
                }
                Token::Close { name } if name.eq_ignore_ascii_case(skip_name) => {
                    skipping = (depth > 1).then_some((skip_name, depth - 1));
                }
                _ => {}
            }
            continue;
        }
        if root_done {
            break;
        }

        match token {
            Token::Open { name, attrs, self_closing } => {
                if is_denied_tag(name) {
                    dropped += 1;
                    if !self_closing {
                        skipping = Some((name, 1));
                    }
                    continue;
                }
                let Some(tag) = canonical_tag(name) else {
                    // Unknown element: unwrap it, children are judged on their own.
                    dropped += 1;
                    continue;
                };
                if open.is_empty() && tag != "svg" {
                    continue;
                }

                out.push('<');
                out.push_str(tag);
                for (key, value) in attrs {
                    match clean_attr(key, value) {
                        Some(key) => {
                            out.push(' ');
                            out.push_str(key);
                            out.push_str("=\"");
                            out.push_str(&escape_attr(value));
                            out.push('"');
                        }
                        None => dropped += 1,
                    }
                }
                if self_closing {
                    out.push_str("/>");
                    if open.is_empty() {
                        root_done = true;
                    }
                } else {
                    out.push('>');
                    open.push(tag);
                }
            }
            Token::Close { name } => {
                let Some(tag) = canonical_tag(name) else { continue };
                if let Some(pos) = open.iter().rposition(|t| *t == tag) {
                    while open.len() > pos {
                        if let Some(t) = open.pop() {
                            out.push_str("</");
                            out.push_str(t);
                            out.push('>');
                        }
                    }
                    if open.is_empty() {
                        root_done = true;
                    }
                }
            }
            Token::Text(text) => {
                if !open.is_empty() {
                    out.push_str(&escape_text(text));
                }
            }
        }
    }

    // Close anything the source left open.
    while let Some(t) = open.pop() {
        out.push_str("</");
        out.push_str(t);
        out.push('>');
    }

    if !out.starts_with("<svg") {
        return Err(EngineError::InvalidMarkup(
            "no <svg> root element after sanitization".to_string(),
        ));
    }
    debug!("sanitized markup: {} item(s) dropped", dropped);
    Ok(out)
}

/// How usable a piece of markup is as a coloring surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColoringValidation {
    pub is_valid: bool,
    pub has_colorable_areas: bool,
    pub colorable_area_count: usize,
    pub warnings: Vec<String>,
}

fn region_id_of<'a>(attrs: &[(&'a str, &'a str)]) -> Option<&'a str> {
    let find = |key: &str| {
        attrs
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(key) && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    };
    find(REGION_ID_ATTR).or_else(|| find("id"))
}

fn colorable_elements(clean: &str) -> Vec<Option<String>> {
    tokenize(clean)
        .into_iter()
        .filter_map(|t| match t {
            Token::Open { name, attrs, .. } if COLORABLE_TAGS.contains(&name) => {
                Some(region_id_of(&attrs).map(str::to_string))
            }
            _ => None,
        })
        .collect()
}

/// Sanitize, then report colorable areas. Warnings never make markup invalid.
pub fn validate_for_coloring(markup: &str) -> ColoringValidation {
    let clean = match sanitize(markup) {
        Ok(clean) => clean,
        Err(e) => {
            return ColoringValidation {
                warnings: vec![e.to_string()],
                ..Default::default()
            };
        }
    };

    let areas = colorable_elements(&clean);
    let mut warnings = Vec::new();
    if areas.is_empty() {
        warnings.push("markup has no colorable areas".to_string());
    }
    let unnamed = areas.iter().filter(|id| id.is_none()).count();
    if unnamed > 0 {
        warnings.push(format!(
            "{} colorable area(s) have no region id",
            unnamed
        ));
    }

    ColoringValidation {
        is_valid: true,
        has_colorable_areas: !areas.is_empty(),
        colorable_area_count: areas.len(),
        warnings,
    }
}

/// Region ids of colorable areas, in document order, without duplicates.
pub fn region_ids(markup: &str) -> Result<Vec<String>> {
    let clean = sanitize(markup)?;
    let mut ids: Vec<String> = Vec::new();
    for id in colorable_elements(&clean).into_iter().flatten() {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn drops_script_before_root() {
        let out = sanitize(r#"<script>alert(1)</script><svg viewBox="0 0 10 10"><rect id="r1" width="5" height="5"/></svg>"#).unwrap();
        assert_eq!(
            out,
            r#"<svg viewBox="0 0 10 10"><rect id="r1" width="5" height="5"/></svg>"#
        );
    }

    #[test]
    fn drops_denied_elements_with_content() {
        let out = sanitize(
            "<svg><style>path{fill:red}</style><g><foreignObject><div>hi</div></foreignObject><path d=\"M0 0\"/></g></svg>",
        )
        .unwrap();
        assert_eq!(out, "<svg><g><path d=\"M0 0\"/></g></svg>");
    }

    #[test]
    fn strips_handlers_style_and_remote_links() {
        let out = sanitize(
            r##"<svg onload="x()"><use href="https://evil/x.svg#a" style="fill:red"/><use xlink:href="#shape" ONCLICK='y()'/><rect fill="url(javascript:alert(1))"/></svg>"##,
        )
        .unwrap();
        assert_eq!(
            out,
            r##"<svg><use/><use xlink:href="#shape"/><rect/></svg>"##
        );
    }

    #[test]
    fn unwraps_unknown_elements_and_keeps_text() {
        let out = sanitize("<svg><unknown><text x=\"1\">a &lt; b</text></unknown></svg>").unwrap();
        assert_eq!(out, "<svg><text x=\"1\">a &lt; b</text></svg>");
    }

    #[test]
    fn canonicalizes_tag_case_and_closes_open_elements() {
        let out = sanitize("<SVG><defs><lineargradient id=\"g\"><stop offset=\"0\"/>").unwrap();
        assert_eq!(
            out,
            "<svg><defs><linearGradient id=\"g\"><stop offset=\"0\"/></linearGradient></defs></svg>"
        );
    }

    #[test]
    fn removes_comments_and_doctype() {
        let out = sanitize(
            "<?xml version=\"1.0\"?><!DOCTYPE svg [<!ENTITY x \"y\">]><!-- <script> --><svg><g/></svg>",
        )
        .unwrap();
        assert_eq!(out, "<svg><g/></svg>");
    }

    #[test]
    fn everything_stripped_is_an_error() {
        assert!(matches!(
            sanitize("<script><svg></svg></script>"),
            Err(EngineError::InvalidMarkup(_))
        ));
        assert!(sanitize("plain text").is_err());
    }

    #[test]
    fn ignores_content_after_root() {
        let out = sanitize("<svg><g/></svg><svg><rect/></svg>trailing").unwrap();
        assert_eq!(out, "<svg><g/></svg>");
    }

    #[test]
    fn validation_counts_and_warns() {
        let report = validate_for_coloring(
            r#"<svg><path id="a" d="M0 0"/><rect data-region-id="b"/><circle r="2"/><line x1="0"/></svg>"#,
        );
        assert!(report.is_valid);
        assert!(report.has_colorable_areas);
        assert_eq!(report.colorable_area_count, 3);
        assert_eq!(report.warnings, vec!["1 colorable area(s) have no region id".to_string()]);
    }

    #[test]
    fn validation_warns_without_areas() {
        let report = validate_for_coloring("<svg><g/></svg>");
        assert!(report.is_valid);
        assert!(!report.has_colorable_areas);
        assert_eq!(report.warnings, vec!["markup has no colorable areas".to_string()]);

        let invalid = validate_for_coloring("<div/>");
        assert!(!invalid.is_valid);
        assert_eq!(invalid.warnings.len(), 1);
    }

    #[test]
    fn region_ids_prefer_explicit_attribute() {
        let ids = region_ids(
            r#"<svg><path id="p1" data-region-id="sky"/><rect id="sea"/><path id="sea"/></svg>"#,
        )
        .unwrap();
        assert_eq!(ids, vec!["sky".to_string(), "sea".to_string()]);
    }
}

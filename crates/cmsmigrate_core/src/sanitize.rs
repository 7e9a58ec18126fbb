//! Allow-list HTML sanitizer for migrated rich content.
//!
//! Legacy bodies are untrusted: anything outside the allow-list is stripped,
//! and a handful of elements are removed together with their content.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use ammonia::Builder;
use scraper::Html;

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "strong", "b", "em", "i",
    "u", "s", "blockquote", "pre", "code", "table", "thead", "tbody", "tfoot", "tr", "th", "td",
    "a", "img", "span", "div", "hr", "sub", "sup",
];

const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "svg", "math",
];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto", "tel", "data"];

fn allowed_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title", "target", "rel"],
        "img" => &["src", "alt", "title", "width", "height"],
        "td" | "th" => &["colspan", "rowspan"],
        _ => &[],
    }
}

static POLICY: LazyLock<Builder<'static>> = LazyLock::new(|| {
    let tag_attributes: HashMap<&'static str, HashSet<&'static str>> = ALLOWED_TAGS
        .iter()
        .map(|tag| (*tag, allowed_attributes(tag)))
        .filter(|(_, attributes)| !attributes.is_empty())
        .map(|(tag, attributes)| (tag, attributes.iter().copied().collect()))
        .collect();

    let mut builder = Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(DROP_WITH_CONTENT.iter().copied().collect())
        .tag_attributes(tag_attributes)
        .generic_attributes(HashSet::new())
        .url_schemes(URL_SCHEMES.iter().copied().collect())
        .link_rel(None)
        .strip_comments(true)
        .attribute_filter(|element, attribute, value| {
            if matches!(attribute, "href" | "src") && !is_safe_url(value, element) {
                None
            } else {
                Some(Cow::Borrowed(value))
            }
        });
    builder
});

pub fn sanitize_html(input: &str) -> String {
    POLICY.clean(input).to_string()
}

/// Text content only, entities decoded. Used for excerpts and plain-text
/// fields; adjacent text nodes are joined with a space.
pub fn strip_tags(input: &str) -> String {
    let fragment = Html::parse_fragment(&sanitize_html(input));
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}

/// `data:` is only accepted for inline images; script schemes never are.
fn is_safe_url(value: &str, element: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|ch| !ch.is_whitespace() && !ch.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.starts_with("javascript:") || compact.starts_with("vbscript:") {
        return false;
    }
    if compact.starts_with("data:") {
        return element == "img" && compact.starts_with("data:image/");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_script_with_its_content() {
        assert_eq!(
            sanitize_html("<script>alert(1)</script><p>Hello</p>"),
            "<p>Hello</p>"
        );
    }

    #[test]
    fn drops_event_handlers_and_styles() {
        assert_eq!(
            sanitize_html(r#"<p onclick="steal()" style="color:red" class="x">Hi</p>"#),
            "<p>Hi</p>"
        );
    }

    #[test]
    fn unknown_tags_are_unwrapped() {
        assert_eq!(
            sanitize_html("<font color=red><b>Bold</b></font>"),
            "<b>Bold</b>"
        );
    }

    #[test]
    fn javascript_urls_are_removed() {
        let cleaned = sanitize_html(r#"<a href=" javascript:alert(1)" title="t">x</a>"#);
        assert!(!cleaned.contains("javascript"));
        assert!(cleaned.contains(r#"title="t""#));
        assert_eq!(
            sanitize_html(r#"<a href="/berita/1">x</a>"#),
            r#"<a href="/berita/1">x</a>"#
        );
    }

    #[test]
    fn encoded_attribute_values_survive_unchanged() {
        assert_eq!(
            sanitize_html(r#"<a href="/cari?q=sidang&amp;tahun=2020">x</a>"#),
            r#"<a href="/cari?q=sidang&amp;tahun=2020">x</a>"#
        );
    }

    #[test]
    fn image_data_urls_only_on_img() {
        assert_eq!(
            sanitize_html(r#"<img src="data:image/png;base64,AAA" onerror="x()">"#),
            r#"<img src="data:image/png;base64,AAA">"#
        );
        assert_eq!(sanitize_html(r#"<a href="data:text/html,x">y</a>"#), "<a>y</a>");
    }

    #[test]
    fn tables_keep_span_attributes() {
        let cleaned =
            sanitize_html(r#"<table><tr><td colspan="2" width="50">A</td></tr></table>"#);
        assert!(cleaned.contains(r#"<td colspan="2">A</td>"#));
        assert!(!cleaned.contains("width"));
    }

    #[test]
    fn comments_are_dropped_and_text_escaped() {
        assert_eq!(sanitize_html("a <!-- hidden --> < b"), "a  &lt; b");
    }

    #[test]
    fn uppercase_script_is_removed() {
        assert_eq!(
            sanitize_html("<SCRIPT type=\"text/javascript\">x()</SCRIPT>ok"),
            "ok"
        );
    }

    #[test]
    fn strip_tags_keeps_text_only() {
        assert_eq!(strip_tags("<p>Hello <b>world</b></p>").trim(), "Hello  world");
        assert_eq!(strip_tags("<p>Tom &amp; Jerry</p><script>x()</script>"), "Tom & Jerry");
    }
}

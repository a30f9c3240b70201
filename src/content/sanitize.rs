use std::sync::LazyLock;

use dom_query::Document;
use regex::Regex;

use crate::content::srcset;

/// Tags allowed to survive the strip pass. Everything else is unwrapped
/// (children kept); script-like tags are removed with their content.
const ALLOWED_TAGS: &[&str] = &[
    "a", "strong", "em", "img", "span", "h1", "h2", "h3", "h4", "h5", "h6", "p", "ul", "li",
];

/// Style values that carry no meaning after import.
const DECORATIVE_STYLES: &[&str] = &[
    "",
    "text-align: justify;",
    "text-align: center;",
    "color: #000000;",
];

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SHARE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<h3>Partager.*").unwrap());
static AMP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&(#?[A-Za-z0-9]+;)?").unwrap());

/// Remove the characters WordPress exports tend to smuggle in: NULs,
/// zero-width characters, BOMs, C0/DEL controls. Non-breaking spaces become
/// plain spaces and whitespace runs collapse to one space.
pub fn clean_chars(content: &str) -> String {
    let filtered: String = content
        .chars()
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .filter(|&c| {
            !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
                && !matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
        })
        .collect();

    WHITESPACE_RE.replace_all(&filtered, " ").trim().to_string()
}

/// Strip the fragment down to the allow-listed tag set.
///
/// `script`/`style`/`noscript`/`iframe` subtrees are dropped entirely,
/// `h1`/`h2` are downgraded to `h3` (imported content never legitimately
/// carries top-level headings), every other disallowed tag is unwrapped.
/// Malformed input parses best-effort and never fails.
pub fn strip_to_allowed(html: &str) -> String {
    let doc = Document::from(html);

    doc.select("script, style, noscript, iframe").remove();
    doc.select("h1, h2").rename("h3");

    let body = doc.select("body");
    let mut disallowed: Vec<String> = Vec::new();
    if let Some(root) = body.nodes().first() {
        for node in root.descendants() {
            if !node.is_element() {
                continue;
            }
            if let Some(name) = node.node_name() {
                let name = name.to_lowercase();
                if !ALLOWED_TAGS.contains(&name.as_str()) && !disallowed.contains(&name) {
                    disallowed.push(name);
                }
            }
        }
    }

    if !disallowed.is_empty() {
        let tags: Vec<&str> = disallowed.iter().map(String::as_str).collect();
        body.strip_elements(&tags);
    }

    body.inner_html().to_string()
}

/// Attribute cleanup: block/text tags lose `class`, any tag loses a
/// decorative `style` value; `img` keeps exactly one attribute, a `src`
/// resolved through the responsive-image picker.
pub fn clean_attributes(html: &str) -> String {
    let doc = Document::from(html);

    for img in doc.select("img").iter() {
        let resolved = srcset::best_src(&img);

        let names: Vec<String> = img
            .nodes()
            .first()
            .map(|node| node.attrs().iter().map(|a| a.name.local.to_string()).collect())
            .unwrap_or_default();
        for name in names {
            img.remove_attr(&name);
        }

        if let Some(src) = resolved {
            img.set_attr("src", &src);
        }
    }

    for el in doc.select("h3, h4, h5, span, p").iter() {
        el.remove_attr("class");
    }

    for el in doc.select("[style]").iter() {
        if let Some(style) = el.attr("style") {
            if DECORATIVE_STYLES.contains(&style.trim()) {
                el.remove_attr("style");
            }
        }
    }

    doc.select("body").inner_html().to_string()
}

/// Drop known trailing boilerplate (the feed appends a "Partager" share
/// section after the article body) and fix the one legacy color code the
/// upstream theme got wrong.
pub fn strip_boilerplate(html: &str) -> String {
    let html = SHARE_BLOCK_RE.replace(html, "");
    html.replace("#800080", "#ce5a9b")
}

/// Encode any `&` that does not already open a recognized entity.
pub fn escape_stray_ampersands(html: &str) -> String {
    AMP_RE
        .replace_all(html, |caps: &regex::Captures| {
            match caps.get(1) {
                Some(_) => caps[0].to_string(),
                None => "&amp;".to_string(),
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_chars_removes_zero_width_and_controls() {
        let dirty = "a\u{200B}b\u{FEFF}c\u{0007}d\0e";
        assert_eq!(clean_chars(dirty), "abcde");
    }

    #[test]
    fn clean_chars_normalizes_nbsp_and_collapses_whitespace() {
        assert_eq!(clean_chars("  a\u{00A0}\u{00A0}b \n\t c  "), "a b c");
    }

    #[test]
    fn strip_removes_script_with_content() {
        let out = strip_to_allowed("<p>keep</p><script>alert('x')</script>");
        assert!(out.contains("keep"));
        assert!(!out.contains("script"));
        assert!(!out.contains("alert"));
    }

    #[test]
    fn strip_unwraps_disallowed_tags_keeping_text() {
        let out = strip_to_allowed("<div><p>one</p><table><tr><td>two</td></tr></table></div>");
        assert!(out.contains("<p>one</p>"));
        assert!(out.contains("two"));
        assert!(!out.contains("<div"));
        assert!(!out.contains("<table"));
    }

    #[test]
    fn strip_downgrades_top_level_headings() {
        let out = strip_to_allowed("<h1>big</h1><h2>mid</h2><h3>kept</h3>");
        assert!(!out.contains("<h1"));
        assert!(!out.contains("<h2"));
        assert_eq!(out.matches("<h3").count(), 3);
    }

    #[test]
    fn strip_survives_malformed_markup() {
        let out = strip_to_allowed("<p>ok<div><script>bad</p></b>");
        assert!(out.contains("ok"));
        assert!(!out.contains("bad"));
    }

    #[test]
    fn img_keeps_only_resolved_src() {
        let out = clean_attributes(
            r#"<img src="small.jpg" srcset="big.jpg 900w, small.jpg 300w" class="wp-image" loading="lazy">"#,
        );
        assert!(out.contains(r#"src="big.jpg""#));
        assert!(!out.contains("srcset"));
        assert!(!out.contains("class"));
        assert!(!out.contains("loading"));
    }

    #[test]
    fn block_tags_lose_class_and_decorative_style() {
        let out = clean_attributes(
            r#"<p class="intro" style="text-align: justify;">a</p><span style="color: #800080;">b</span>"#,
        );
        assert!(!out.contains("class"));
        assert!(!out.contains("justify"));
        // Meaningful color styles survive for the color-fix pass.
        assert!(out.contains("#800080"));
    }

    #[test]
    fn decorative_style_is_stripped_from_any_tag() {
        let out = clean_attributes(
            r#"<ul style="text-align: center;"><li style="color: #000000;">a</li></ul>"#,
        );
        assert!(!out.contains("style"));
    }

    #[test]
    fn share_block_is_dropped_from_the_tail() {
        let out = strip_boilerplate("<p>article</p><h3>Partager :</h3><p>buttons</p>");
        assert_eq!(out, "<p>article</p>");
    }

    #[test]
    fn legacy_purple_is_corrected() {
        let out = strip_boilerplate(r#"<span style="color: #800080;">x</span>"#);
        assert!(out.contains("#ce5a9b"));
    }

    #[test]
    fn stray_ampersands_are_encoded_entities_kept() {
        assert_eq!(
            escape_stray_ampersands("Laurel & Hardy &amp; co &#8217;"),
            "Laurel &amp; Hardy &amp; co &#8217;"
        );
    }
}

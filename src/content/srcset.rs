use std::sync::LazyLock;

use dom_query::Selection;
use regex::Regex;

static WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.+?)\s+(\d+)w$").unwrap());

/// One `url width` pair from a srcset attribute. Width 0 means no size hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: String,
    pub width: u32,
}

/// Pick the best source URL for an image element.
///
/// Responsive images carry a `srcset` (or lazy-loader `data-srcset`) listing
/// several sizes; the largest one wins. Images without a srcset keep their
/// plain `src`.
pub fn best_src(img: &Selection) -> Option<String> {
    let plain = img.attr("src").map(|s| s.to_string()).filter(|s| !s.is_empty());

    let srcset = img
        .attr("srcset")
        .or_else(|| img.attr("data-srcset"))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());

    let Some(srcset) = srcset else {
        return plain;
    };

    let candidates = parse(&srcset);
    if candidates.is_empty() {
        return plain;
    }

    largest(&candidates)
}

/// Parse a comma-separated srcset value into candidates.
/// Entries without a `<digits>w` token get width 0.
pub fn parse(srcset: &str) -> Vec<ImageCandidate> {
    let mut sources = Vec::new();

    for part in srcset.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some(caps) = WIDTH_RE.captures(part) {
            let width = caps[2].parse().unwrap_or(0);
            sources.push(ImageCandidate {
                url: caps[1].trim().to_string(),
                width,
            });
        } else {
            sources.push(ImageCandidate {
                url: part.to_string(),
                width: 0,
            });
        }
    }

    sources
}

/// URL with the strictly largest width; ties keep the first-seen candidate.
pub fn largest(sources: &[ImageCandidate]) -> Option<String> {
    let mut best: Option<&ImageCandidate> = None;
    for candidate in sources {
        match best {
            Some(b) if candidate.width <= b.width => {}
            _ => best = Some(candidate),
        }
    }
    best.map(|c| c.url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dom_query::Document;

    #[test]
    fn largest_width_wins_first_on_tie() {
        let sources = parse("a.jpg 400w, b.jpg 800w, c.jpg 800w");
        assert_eq!(largest(&sources).as_deref(), Some("b.jpg"));
    }

    #[test]
    fn missing_width_token_is_zero() {
        let sources = parse("plain.jpg, sized.jpg 120w");
        assert_eq!(sources[0], ImageCandidate { url: "plain.jpg".into(), width: 0 });
        assert_eq!(sources[1].width, 120);
        assert_eq!(largest(&sources).as_deref(), Some("sized.jpg"));
    }

    #[test]
    fn no_srcset_falls_back_to_src() {
        let doc = Document::from(r#"<img src="only.jpg">"#);
        assert_eq!(best_src(&doc.select("img")).as_deref(), Some("only.jpg"));
    }

    #[test]
    fn data_srcset_is_honored() {
        let doc = Document::from(r#"<img src="tiny.jpg" data-srcset="big.jpg 1200w, mid.jpg 600w">"#);
        assert_eq!(best_src(&doc.select("img")).as_deref(), Some("big.jpg"));
    }

    #[test]
    fn unparseable_srcset_falls_back_to_src() {
        let doc = Document::from(r#"<img src="fallback.jpg" srcset=" , ,">"#);
        assert_eq!(best_src(&doc.select("img")).as_deref(), Some("fallback.jpg"));
    }

    #[test]
    fn no_src_at_all_is_none() {
        let doc = Document::from(r#"<img alt="decorative">"#);
        assert_eq!(best_src(&doc.select("img")), None);
    }
}

use dom_query::Document;
use url::Url;

/// One externally-hosted media widget found in article content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedMedia {
    pub src: String,
    /// Originating service (`youtube`, `spotify`, ...); empty when the host
    /// does not classify.
    pub service: String,
    /// 1-based first-seen position in the source document.
    pub order: u32,
}

/// Scan a fragment for iframe embeds, in document order.
///
/// Map semantics on `src`: a repeated URL keeps its first-seen order but takes
/// the last occurrence's classification. Malformed markup never fails, the
/// tree is built best-effort.
pub fn extract(html: &str) -> Vec<EmbeddedMedia> {
    let doc = Document::from(html);
    let mut results: Vec<EmbeddedMedia> = Vec::new();

    for iframe in doc.select("iframe[src]").iter() {
        let Some(src) = iframe.attr("src") else { continue };
        let src = src.to_string();
        if src.is_empty() {
            continue;
        }

        let service = classify(&src);

        if let Some(existing) = results.iter_mut().find(|e| e.src == src) {
            existing.service = service;
        } else {
            let order = results.len() as u32 + 1;
            results.push(EmbeddedMedia { src, service, order });
        }
    }

    results
}

/// Classify an embed URL by its host labels.
///
/// `www.youtube.com` -> `youtube` (three labels, middle one);
/// `spotify.com` and `open.spotify.com` -> `spotify` (second-to-last);
/// anything else -> empty string.
pub fn classify(src: &str) -> String {
    let Some(host) = parse_host(src) else {
        return String::new();
    };

    let parts: Vec<&str> = host.split('.').collect();
    match parts.len() {
        3 if parts[0] != "open" => parts[1].to_string(),
        2 => parts[0].to_string(),
        3 => parts[1].to_string(),
        _ => String::new(),
    }
}

fn parse_host(src: &str) -> Option<String> {
    // Protocol-relative srcs are common in old embed codes.
    let absolute = if src.starts_with("//") {
        format!("https:{src}")
    } else {
        src.to_string()
    };
    let url = Url::parse(&absolute).ok()?;
    url.host_str().map(|h| h.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_www_host() {
        assert_eq!(classify("https://www.youtube.com/embed/x"), "youtube");
    }

    #[test]
    fn spotify_bare_and_open_hosts() {
        assert_eq!(classify("https://spotify.com/x"), "spotify");
        assert_eq!(classify("https://open.spotify.com/track/x"), "spotify");
    }

    #[test]
    fn single_label_host_is_unclassified() {
        assert_eq!(classify("https://localhost/embed"), "");
    }

    #[test]
    fn four_label_host_is_unclassified() {
        assert_eq!(classify("https://a.b.example.com/x"), "");
    }

    #[test]
    fn unparseable_src_is_unclassified() {
        assert_eq!(classify("not a url"), "");
    }

    #[test]
    fn document_order_and_one_based_index() {
        let html = r#"
            <p>intro</p>
            <iframe src="https://www.youtube.com/embed/a"></iframe>
            <p>middle</p>
            <iframe src="https://open.spotify.com/track/b"></iframe>
        "#;
        let embeds = extract(html);
        assert_eq!(embeds.len(), 2);
        assert_eq!(embeds[0].service, "youtube");
        assert_eq!(embeds[0].order, 1);
        assert_eq!(embeds[1].service, "spotify");
        assert_eq!(embeds[1].order, 2);
    }

    #[test]
    fn duplicate_src_keeps_first_order_last_service() {
        let html = r#"
            <iframe src="https://www.youtube.com/embed/a"></iframe>
            <iframe src="https://www.vimeo.com/v/b"></iframe>
            <iframe src="https://www.youtube.com/embed/a"></iframe>
        "#;
        let embeds = extract(html);
        assert_eq!(embeds.len(), 2);
        assert_eq!(embeds[0].src, "https://www.youtube.com/embed/a");
        assert_eq!(embeds[0].order, 1);
    }

    #[test]
    fn iframe_without_src_is_skipped() {
        let embeds = extract("<iframe></iframe>");
        assert!(embeds.is_empty());
    }

    #[test]
    fn malformed_markup_does_not_fail() {
        let embeds = extract("<div><iframe src='https://www.youtube.com/embed/x'<p>broken");
        assert!(embeds.len() <= 1);
    }
}

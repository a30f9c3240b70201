pub mod embeds;
pub mod figures;
pub mod sanitize;
pub mod srcset;

pub use embeds::EmbeddedMedia;

/// Output of the normalization pipeline for one article body.
#[derive(Debug, Clone)]
pub struct NormalizedContent {
    pub html: String,
    pub embeds: Vec<EmbeddedMedia>,
}

/// Fixed-order normalization pipeline: character cleanup, embed capture,
/// tag allow-list strip, attribute cleanup, boilerplate removal, entity
/// safety, figure/caption promotion.
///
/// Every stage is best-effort on malformed markup; this function never fails.
pub fn normalize(raw_html: &str) -> NormalizedContent {
    let cleaned = sanitize::clean_chars(raw_html);

    // Embeds are captured first, then their markup disappears in the strip
    // pass (iframe is not an allowed tag).
    let embeds = embeds::extract(&cleaned);

    let html = sanitize::strip_to_allowed(&cleaned);
    let html = sanitize::clean_attributes(&html);
    let html = sanitize::strip_boilerplate(&html);
    let html = sanitize::escape_stray_ampersands(&html);
    let html = figures::restructure(&html);

    NormalizedContent { html, embeds }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pipeline_on_a_messy_body() {
        let raw = r#"
            <h1 class="title">Une critique</h1>
            <script>steal()</script>
            <p style="text-align: justify;">Laurel & Hardy reviennent.</p>
            <iframe src="https://www.youtube.com/embed/xyz"></iframe>
            <p><img src="s.jpg" srcset="l.jpg 1024w, s.jpg 300w" class="wp-image">Photo: Studio</p>
            <h3>Partager :</h3><p>facebook twitter</p>
        "#;

        let out = normalize(raw);

        assert_eq!(out.embeds.len(), 1);
        assert_eq!(out.embeds[0].service, "youtube");
        assert_eq!(out.embeds[0].order, 1);

        assert!(!out.html.contains("script"));
        assert!(!out.html.contains("iframe"));
        assert!(!out.html.contains("Partager"));
        assert!(!out.html.contains("<h1"));
        assert!(out.html.contains("<h3"));
        assert!(out.html.contains("&amp;"));
        assert!(out.html.contains(r#"src="l.jpg""#));
        assert!(out.html.contains(r#"figure class="image""#));
        assert!(out.html.contains("Photo: Studio"));
    }

    #[test]
    fn empty_body_normalizes_to_empty() {
        let out = normalize("");
        assert!(out.html.is_empty());
        assert!(out.embeds.is_empty());
    }

    #[test]
    fn embed_markup_is_removed_but_prose_kept() {
        let out = normalize(r#"<p>avant</p><iframe src="https://open.spotify.com/track/t"></iframe><p>après</p>"#);
        assert_eq!(out.embeds.len(), 1);
        assert_eq!(out.embeds[0].service, "spotify");
        assert!(out.html.contains("avant"));
        assert!(out.html.contains("après"));
        assert!(!out.html.contains("iframe"));
    }
}

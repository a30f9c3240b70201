use dom_query::{Document, NodeRef, Selection};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "tiff"];

/// Promote loose caption text into structured figure/caption markup.
///
/// Four passes, in an order each later pass depends on:
/// 1. anchors wrapping an image get their `href` re-pointed at the image's
///    `src` when the link targets a (stale) image URL;
/// 2. `<img>text` becomes `<figure class="image"><img><figcaption
///    class="credits">text</figcaption></figure>`;
/// 3. same promotion for `<a><img></a>text`;
/// 4. `<a><img></a><strong>text</strong>` (or `<em>`) promotes with the
///    emphasis text as caption, discarding the wrapper.
///
/// Each pass snapshots its matches before mutating, promotes a clone of the
/// matched element and removes the consumed trailing sibling. Returns the
/// serialized body content.
pub fn restructure(html: &str) -> String {
    let doc = Document::from(html);

    sync_linked_image_hrefs(&doc);
    promote_bare_images(&doc);
    promote_linked_images(&doc);
    promote_emphasis_captions(&doc);

    doc.select("body").inner_html().to_string()
}

/// Upstream content often links an image to a stale CDN copy of itself;
/// the displayed `src` is the one that survived import.
fn sync_linked_image_hrefs(doc: &Document) {
    for anchor in doc.select("a").iter() {
        let img = anchor.select("img");
        if !img.exists() {
            continue;
        }
        let Some(src) = img.attr("src") else { continue };
        let Some(href) = anchor.attr("href") else { continue };
        if !src.is_empty() && is_image_url(&href) && *src != *href {
            anchor.set_attr("href", &src);
        }
    }
}

fn promote_bare_images(doc: &Document) {
    let images: Vec<NodeRef> = doc
        .select("img")
        .iter()
        .filter_map(|sel| sel.nodes().first().cloned())
        .collect();

    for image in images {
        promote_with_trailing_text(&image);
    }
}

fn promote_linked_images(doc: &Document) {
    for anchor in anchors_wrapping_images(doc) {
        promote_with_trailing_text(&anchor);
    }
}

fn promote_emphasis_captions(doc: &Document) {
    for anchor in anchors_wrapping_images(doc) {
        let Some(next) = anchor.next_sibling() else { continue };
        if !next.is_element() {
            continue;
        }
        let is_emphasis = next
            .node_name()
            .is_some_and(|n| n.eq_ignore_ascii_case("strong") || n.eq_ignore_ascii_case("em"));
        if !is_emphasis {
            continue;
        }

        let caption = next.text().trim().to_string();
        if caption.is_empty() {
            continue;
        }

        let sel = Selection::from(anchor.clone());
        let figure = build_figure(&sel.html(), &caption);
        Selection::from(next).remove();
        sel.replace_with_html(figure);
    }
}

/// Shared promotion for passes 2 and 3: the element plus a non-empty trailing
/// text node collapse into one figure.
fn promote_with_trailing_text(node: &NodeRef) {
    let Some(next) = node.next_sibling() else { return };
    if !next.is_text() {
        return;
    }

    let caption = next.text().trim().to_string();
    if caption.is_empty() {
        return;
    }

    let sel = Selection::from(node.clone());
    let figure = build_figure(&sel.html(), &caption);
    Selection::from(next).remove();
    sel.replace_with_html(figure);
}

fn anchors_wrapping_images<'a>(doc: &'a Document) -> Vec<NodeRef<'a>> {
    doc.select("a")
        .iter()
        .filter(|a| a.select("img").exists())
        .filter_map(|a| a.nodes().first().cloned())
        .collect()
}

fn build_figure(promoted_html: &str, caption: &str) -> String {
    format!(
        r#"<figure class="image">{promoted_html}<figcaption class="credits">{}</figcaption></figure>"#,
        escape_html(caption)
    )
}

fn is_image_url(url: &str) -> bool {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url);
    path.rsplit('.')
        .next()
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

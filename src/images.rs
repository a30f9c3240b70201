use anyhow::Result;

/// One remote image the collaborator captured and re-hosted.
#[derive(Debug, Clone)]
pub struct RehostedImage {
    /// The exact URL string as it appeared in the scanned content.
    pub base_match: String,
    /// Path of the re-hosted copy, relative to the public root (no leading `/`).
    pub relative_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImageReport {
    pub success: Vec<RehostedImage>,
}

#[derive(Debug, Clone)]
pub struct ImportedImage {
    pub status: String,
    pub relative_path: String,
}

/// Image re-hosting collaborator. The pipeline hands it content (or a bare
/// URL), gets back which URLs were captured, and rewrites those occurrences
/// itself; the storage mechanics live behind this seam.
pub trait ImageStore {
    fn import_images_from(
        &self,
        content: &str,
        base_path: Option<&str>,
        subfolder: &str,
    ) -> Result<ImageReport>;

    fn import_image(
        &self,
        url: &str,
        folder: &str,
        base_path: Option<&str>,
        filename: &str,
    ) -> Result<ImportedImage>;
}

/// No-op store used when re-hosting is turned off: nothing is captured, so
/// the pipeline leaves every URL as-is.
pub struct DisabledImageStore;

impl ImageStore for DisabledImageStore {
    fn import_images_from(
        &self,
        _content: &str,
        _base_path: Option<&str>,
        _subfolder: &str,
    ) -> Result<ImageReport> {
        Ok(ImageReport::default())
    }

    fn import_image(
        &self,
        url: &str,
        _folder: &str,
        _base_path: Option<&str>,
        _filename: &str,
    ) -> Result<ImportedImage> {
        Ok(ImportedImage {
            status: "skipped".into(),
            relative_path: url.to_string(),
        })
    }
}

/// Rewrite every captured URL to its re-hosted path, in both the literal form
/// and the JSON-escaped form (article bodies can embed JSON blobs where the
/// same URL appears with escaped slashes).
pub fn apply_rehosted(content: &str, report: &ImageReport) -> String {
    let mut out = content.to_string();
    for image in &report.success {
        let target = format!("/{}", image.relative_path);
        out = out.replace(&image.base_match, &target);
        out = out.replace(&json_escaped(&image.base_match), &json_escaped(&target));
    }
    out
}

/// JSON string-escape without the surrounding quotes, with PHP-style `\/`
/// slash escaping (that is the form the upstream feed emits).
fn json_escaped(s: &str) -> String {
    let quoted = serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""));
    quoted
        .trim_matches('"')
        .replace('/', "\\/")
}

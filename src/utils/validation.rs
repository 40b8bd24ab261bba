use std::path::Path;

/// Used when an upload arrives without a usable name
pub const FALLBACK_NAME: &str = "unnamed.pdf";

/// Reduces a client supplied name to a single safe path component.
///
/// Directory parts are dropped and reserved characters replaced, so the
/// result can be used in `Content-Disposition` headers, reconstruction
/// scripts and as a file name when writing outputs to disk.
pub fn sanitize_filename(filename: &str) -> String {
    // Treat both separators as separators regardless of platform
    let last = filename
        .rsplit(&['/', '\\'][..])
        .next()
        .unwrap_or("")
        .trim();

    let name = Path::new(last)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if name.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::debug!("Stripped path components from upload name: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
                || c == ';'
                || c == '%'
                || c == '$'
                || c == '`'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Leading dashes would be read as options by the reconstruction script
    let sanitized = sanitized.trim_start_matches(['.', '-']).to_string();

    // Limit length safely for UTF-8
    let sanitized = if sanitized.len() > 200 {
        let mut end = 200;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        sanitized
    }
}

/// Name without its last extension, used as the stem of part files
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Ensures an output name ends in `.pdf`
pub fn output_file_name(requested: Option<&str>) -> String {
    let name = sanitize_filename(requested.unwrap_or("merged.pdf"));
    if name.to_lowercase().ends_with(".pdf") {
        name
    } else {
        format!("{}.pdf", name)
    }
}

/// Sniffs the first bytes of an upload; informational only.
pub fn looks_like_pdf(header: &[u8]) -> bool {
    infer::get(header)
        .map(|kind| kind.mime_type() == "application/pdf")
        .unwrap_or(false)
}

use std::path::Path;

/// Placeholder used when nothing usable is left of a client filename
pub const UNNAMED_FILENAME: &str = "unnamed";

/// Image types eligible for image-only routes and compression
pub const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];

/// Makes a client-supplied filename safe to store and display.
///
/// Path separators become underscores and leading dots are stripped (after
/// trimming whitespace, repeatedly), so the result can never act as a path
/// component such as `..` or a hidden file. Never returns an empty string.
pub fn safe_filename(filename: &str) -> String {
    let replaced = filename.replace(['/', '\\'], "_");

    let mut name = replaced.as_str();
    loop {
        let trimmed = name.trim();
        match trimmed.strip_prefix('.') {
            Some(rest) => name = rest,
            None => {
                name = trimmed;
                break;
            }
        }
    }

    if name.is_empty() {
        UNNAMED_FILENAME.to_string()
    } else {
        name.to_string()
    }
}

/// Whether the declared MIME type is one of the supported image types.
/// Parameters and letter case are ignored.
pub fn is_image_mime(content_type: &str) -> bool {
    content_type
        .parse::<mime::Mime>()
        .map(|m| {
            let essence = m.essence_str().to_ascii_lowercase();
            IMAGE_MIME_TYPES.contains(&essence.as_str())
        })
        .unwrap_or(false)
}

/// Extension of the declared filename including the leading dot, or empty.
///
/// Only the final path component is considered, and an extension that would
/// smuggle a separator into the temp filename is dropped.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.contains(['/', '\\', '\0']))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

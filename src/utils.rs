//! Small shared utilities.

/// Guess MIME by inspecting bytes (magic numbers).
pub fn guess_mime_from_bytes(bytes: &[u8]) -> Option<String> {
    infer::get(bytes).map(|k| k.mime_type().to_string())
}

/// Guess MIME by file path or URL (extension-based).
pub fn guess_mime_from_path_or_url(path_or_url: &str) -> Option<String> {
    mime_guess::from_path(path_or_url)
        .first_raw()
        .map(|s| s.to_string())
}

/// Combined guess: prefer bytes, fall back to extension.
pub fn guess_mime(bytes: Option<&[u8]>, path_or_url: Option<&str>) -> Option<String> {
    if let Some(b) = bytes {
        if let Some(m) = guess_mime_from_bytes(b) {
            return Some(m);
        }
    }
    path_or_url.and_then(guess_mime_from_path_or_url)
}

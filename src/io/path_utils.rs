//! Path utilities for file-backed caches, queues and sinks.

/// Sanitize a string for use as a single path component.
///
/// Replaces traversal sequences and characters that are unsafe in file names.
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    let s = s.replace("..", "__");
    let s = s.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
    if s.is_empty() { "_".to_string() } else { s }
}

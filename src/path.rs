//! Path normalization shared by route registration and request matching.

/// Segment separator for both patterns and request paths.
pub const SEPARATOR: char = '/';

/// Maximum number of raw pieces a path may split into.
///
/// Patterns that deep are rejected at registration and request paths that
/// deep never match anything.
pub const MAX_DEPTH: usize = 255;

/// Splits a raw path into its non-empty segments.
///
/// Leading and trailing separators are trimmed, repeated separators are
/// collapsed and every segment is stripped of surrounding whitespace.
/// A path made only of separators and whitespace yields no segments.
///
/// Returns `None` when the path is deeper than [`MAX_DEPTH`].
///
/// ```
/// # use bitroute::split;
/// assert_eq!(split("//api//v1/module/"), Some(vec!["api", "v1", "module"]));
/// assert_eq!(split("  /  //  "), Some(vec![]));
/// assert_eq!(split(&"/A".repeat(300)), None);
/// ```
pub fn split(path: &str) -> Option<Vec<&str>> {
    let trimmed = path.trim_matches(SEPARATOR);
    if trimmed.is_empty() {
        return Some(Vec::new());
    }

    // count raw pieces, empty ones included, before allocating anything
    let pieces = trimmed.matches(SEPARATOR).count() + 1;
    if pieces >= MAX_DEPTH {
        return None;
    }

    let mut segments = Vec::with_capacity(pieces);
    for piece in trimmed.split(SEPARATOR) {
        let piece = piece.trim();
        if !piece.is_empty() {
            segments.push(piece);
        }
    }
    Some(segments)
}

/// Rebuilds the canonical form of a split path, e.g. `/api/v1`.
pub(crate) fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let len = segments.iter().map(|s| s.as_ref().len() + 1).sum::<usize>();
    let mut path = String::with_capacity(len.max(1));
    for segment in segments {
        path.push(SEPARATOR);
        path.push_str(segment.as_ref());
    }
    if path.is_empty() {
        path.push(SEPARATOR);
    }
    path
}

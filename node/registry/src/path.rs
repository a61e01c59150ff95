//! Path composition helpers.
//!
//! Paths are slash-separated strings. As a message crosses a link, the
//! receiving side prepends its local name for that link to the source
//! path, so multi-hop provenance accumulates in order.

/// Split a path at its first separator.
///
/// Returns the leading segment and the remainder, if any.
pub fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

/// Prepend a link name to an optional source path.
pub fn prepend_link(link_name: &str, source: Option<&str>) -> String {
    match source {
        Some(s) => format!("{}/{}", link_name, s),
        None => link_name.to_string(),
    }
}

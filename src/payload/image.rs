//! Image reference parsing.
//!
//! Image references look like `registry/namespace/name:tag` or
//! `name@sha256:digest`. Only two things are derived from them: the tag and
//! the repository name (the final path segment).
//!
//! The tag is whatever follows the last `:` after the last `/`. Digest
//! references are not special-cased, so `widget@sha256:abc` yields the tag
//! `abc`. The repository name strips both the tag and any `@digest`.

/// Splits `image` into name and tag.
///
/// A colon before the last slash belongs to a registry port
/// (`localhost:5000/widget`) and is not a tag separator. An empty tag
/// (`widget:`) counts as no tag.
///
/// ```
/// use vuln_dispatch_relay::payload::split_tag;
///
/// assert_eq!(split_tag("ghcr.io/acme/widget:1.2.3"), ("ghcr.io/acme/widget", Some("1.2.3")));
/// assert_eq!(split_tag("localhost:5000/widget"), ("localhost:5000/widget", None));
/// ```
pub fn split_tag(image: &str) -> (&str, Option<&str>) {
    let last_segment_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[last_segment_start..].rfind(':') {
        Some(offset) => {
            let colon = last_segment_start + offset;
            let tag = &image[colon + 1..];
            (&image[..colon], (!tag.is_empty()).then_some(tag))
        }
        None => (image, None),
    }
}

/// Returns the tag of `image`, if it names one.
pub fn parse_tag(image: &str) -> Option<&str> {
    split_tag(image).1
}

/// Returns the repository name for `image`: the final path segment with tag
/// and digest removed. `None` if nothing is left.
///
/// ```
/// use vuln_dispatch_relay::payload::repository_name;
///
/// assert_eq!(repository_name("ghcr.io/acme/widget:1.2.3"), Some("widget"));
/// assert_eq!(repository_name("widget@sha256:0123"), Some("widget"));
/// assert_eq!(repository_name("ghcr.io/acme/"), None);
/// ```
pub fn repository_name(image: &str) -> Option<&str> {
    let (name, _) = split_tag(image.trim());
    let segment = name.rsplit('/').next().unwrap_or(name);
    let segment = segment.split('@').next().unwrap_or(segment);
    (!segment.is_empty()).then_some(segment)
}

/// Whether `name` can be a GitHub repository name.
///
/// GitHub allows ASCII letters, digits, `.`, `-` and `_`; `.` and `..` are
/// reserved.
pub fn is_valid_repository_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

use crate::data::{NameMapper, ObjectRef};

/// The default in-archive path for `full_name` listed under `prefix`.
///
/// A prefix ending in `/` names a directory and all of its segments are
/// stripped. Otherwise its last segment is treated as a partial name and
/// kept, so listing `logs/2024/01` archives `logs/2024/01/a.txt` as
/// `01/a.txt`. Names that would be left empty keep their full path.
///
/// # Examples
///
/// ```
/// use zipbucket::suggest_name;
///
/// assert_eq!(suggest_name("a/b/c/d.txt", "a/b/"), "c/d.txt");
/// assert_eq!(suggest_name("logs/2024/01/a.txt", "logs/2024/01"), "01/a.txt");
/// assert_eq!(suggest_name("x/y.txt", ""), "x/y.txt");
/// ```
pub fn suggest_name(full_name: &str, prefix: &str) -> String {
    if prefix.is_empty() || prefix == "/" {
        return full_name.to_string();
    }

    let prefix_segments = prefix.split('/').filter(|s| !s.is_empty()).count();
    let keep_last = !prefix.ends_with('/');
    let strip = if keep_last {
        prefix_segments.saturating_sub(1)
    } else {
        prefix_segments
    };
    if strip == 0 {
        return full_name.to_string();
    }

    let segments: Vec<&str> = full_name.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() > strip {
        segments[strip..].join("/")
    } else {
        full_name.to_string()
    }
}

/// The archive path for `object`, or `None` when the mapper excludes it.
///
/// A mapper returning `None` or an empty string excludes the object.
pub fn archive_path(object: &ObjectRef, prefix: &str, mapper: Option<&NameMapper>) -> Option<String> {
    let suggested = suggest_name(&object.name, prefix);
    match mapper {
        None => Some(suggested),
        Some(mapper) => mapper(object, &suggested).filter(|path| !path.is_empty()),
    }
}

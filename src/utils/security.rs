//! Confinement of caller supplied paths to a storage root

use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::storage::StorageError;

/// Path semantics used when joining a target onto a base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Host filesystem paths (local adapters)
    Native,
    /// Forward-slash URL paths (remote adapters), independent of the host OS
    Posix,
}

/// Resolve `target` against `base` and refuse anything that lands outside of it.
///
/// Leading slashes on the target are ignored, so `/a/b` and `a/b` address the
/// same entry. `.` and `..` segments are folded lexically; the filesystem is
/// never consulted. Percent-encoded sequences are not decoded here, the HTTP
/// layer has already decoded the request path once.
pub fn resolve_secure_path(base: &str, target: &str, style: PathStyle) -> Result<String, StorageError> {
    if target.contains('\0') {
        warn!("Rejected path containing null bytes: {:?}", target);
        return Err(StorageError::AccessDenied(target.to_string()));
    }

    let sanitized = target.trim_start_matches(['/', '\\']);

    let resolved = match style {
        PathStyle::Native => resolve_native(base, sanitized),
        PathStyle::Posix => resolve_posix(base, sanitized),
    };

    match resolved {
        Some(path) => {
            debug!("Resolved '{}' under '{}' to '{}'", target, base, path);
            Ok(path)
        }
        None => {
            warn!("Path traversal attempt detected: '{}' escapes '{}'", target, base);
            Err(StorageError::AccessDenied(target.to_string()))
        }
    }
}

fn resolve_native(base: &str, target: &str) -> Option<String> {
    let base_path = Path::new(base);
    let absolute_base = if base_path.is_absolute() {
        normalize_path(base_path)
    } else {
        let current_dir = std::env::current_dir().unwrap_or_default();
        normalize_path(&current_dir.join(base_path))
    };

    let joined = normalize_path(&absolute_base.join(target));
    let relative = joined.strip_prefix(&absolute_base).ok()?;
    if matches!(relative.components().next(), Some(Component::ParentDir)) {
        return None;
    }

    Some(joined.to_string_lossy().to_string())
}

fn resolve_posix(base: &str, target: &str) -> Option<String> {
    let base_segments = normalize_segments(base.split('/'))?;
    let joined = normalize_segments(base.split('/').chain(target.split(['/', '\\'])))?;

    if joined.len() < base_segments.len() || joined[..base_segments.len()] != base_segments[..] {
        return None;
    }

    Some(format!("/{}", joined.join("/")))
}

/// Fold `.` and `..` out of a list of posix segments. Returns `None` if a
/// `..` would climb past the root.
fn normalize_segments<'a>(segments: impl Iterator<Item = &'a str>) -> Option<Vec<&'a str>> {
    let mut normalized = Vec::new();
    for segment in segments {
        match segment {
            "" | "." => {}
            ".." => {
                normalized.pop()?;
            }
            other => normalized.push(other),
        }
    }
    Some(normalized)
}

/// Normalize a path by resolving . and .. components without filesystem access.
/// A `..` at the root is kept so the caller can detect the escape.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(_) | Component::RootDir | Component::Prefix(_) => {
                normalized.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_paths_stay_within_base() {
        let resolved = resolve_secure_path("/srv/media", "RJ123456/track 01.flac", PathStyle::Native).unwrap();
        assert_eq!(resolved, "/srv/media/RJ123456/track 01.flac");

        let resolved = resolve_secure_path("/srv/media", "/RJ123456/./disc1/../cover.jpg", PathStyle::Native).unwrap();
        assert_eq!(resolved, "/srv/media/RJ123456/cover.jpg");

        let resolved = resolve_secure_path("/srv/media", "", PathStyle::Native).unwrap();
        assert_eq!(resolved, "/srv/media");
    }

    #[test]
    fn test_native_traversal_attempts_are_denied() {
        let traversal_attempts = vec![
            "../etc/passwd",
            "../../../etc/passwd",
            "/../media-other/file.mp3",
            "RJ123456/../../secret.txt",
            "a/b/../../../c",
        ];

        for attempt in traversal_attempts {
            let result = resolve_secure_path("/srv/media", attempt, PathStyle::Native);
            assert!(
                matches!(result, Err(StorageError::AccessDenied(_))),
                "Should reject path traversal attempt: {}", attempt
            );
        }
    }

    #[test]
    fn test_sibling_with_common_prefix_is_denied() {
        let result = resolve_secure_path("/srv/media", "../media2/file.flac", PathStyle::Native);
        assert!(result.is_err());
    }

    #[test]
    fn test_relative_base_is_made_absolute() {
        let resolved = resolve_secure_path("library", "RJ01/a.mp3", PathStyle::Native).unwrap();
        assert!(Path::new(&resolved).is_absolute());
        assert!(resolved.ends_with("library/RJ01/a.mp3"));
    }

    #[test]
    fn test_posix_paths() {
        let resolved = resolve_secure_path("/dav/music", "/RJ01/a.flac", PathStyle::Posix).unwrap();
        assert_eq!(resolved, "/dav/music/RJ01/a.flac");

        let resolved = resolve_secure_path("/", "RJ01", PathStyle::Posix).unwrap();
        assert_eq!(resolved, "/RJ01");

        let resolved = resolve_secure_path("/dav/music/", "RJ01/sub/../b.mp3", PathStyle::Posix).unwrap();
        assert_eq!(resolved, "/dav/music/RJ01/b.mp3");
    }

    #[test]
    fn test_posix_traversal_attempts_are_denied() {
        for attempt in ["../other", "RJ01/../../other", "..\\..\\windows", "/../../"] {
            let result = resolve_secure_path("/dav/music", attempt, PathStyle::Posix);
            assert!(result.is_err(), "Should reject posix traversal attempt: {}", attempt);
        }
    }

    #[test]
    fn test_null_bytes_are_denied() {
        assert!(resolve_secure_path("/srv/media", "a\0b", PathStyle::Native).is_err());
        assert!(resolve_secure_path("/dav", "a\0b", PathStyle::Posix).is_err());
    }

    #[test]
    fn test_encoded_segments_are_not_decoded() {
        let resolved = resolve_secure_path("/dav", "%2e%2e/x", PathStyle::Posix).unwrap();
        assert_eq!(resolved, "/dav/%2e%2e/x");
    }
}

//! Slash-delimited document pointers with RFC 6901 segment escaping.
//!
//! Pointers handled here are absolute (`/` is the document root). Scope-relative pointers use the
//! same syntax and are joined onto a scope path with [`resolve`].

use thiserror::Error;

pub const ROOT: &str = "/";

/// Property under which a scope keeps its contracts.
pub const CONTRACTS_KEY: &str = "contracts";

/// Contract keys owned by the engine. Handler patches may never touch them.
pub const EMBEDDED_KEY: &str = "embedded";
pub const INITIALIZED_KEY: &str = "initialized";
pub const TERMINATED_KEY: &str = "terminated";
pub const CHECKPOINT_KEY: &str = "checkpoint";
pub const FAILURE_KEY: &str = "failure";

pub const RESERVED_CONTRACT_KEYS: &[&str] = &[
    EMBEDDED_KEY,
    INITIALIZED_KEY,
    TERMINATED_KEY,
    CHECKPOINT_KEY,
    FAILURE_KEY,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PointerError {
    #[error("pointer '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("pointer '{0}' contains an invalid escape sequence")]
    InvalidEscape(String),
    #[error("pointer '{path}' is outside scope '{scope}'")]
    OutsideScope { scope: String, path: String },
}

/// Normalizes a raw pointer: empty means root, a leading slash is added when missing and a
/// trailing slash is dropped.
pub fn normalize(raw: &str) -> Result<String, PointerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == ROOT {
        return Ok(ROOT.to_string());
    }
    let mut body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if let Some(stripped) = body.strip_suffix('/') {
        body = stripped;
    }
    for segment in body.split('/') {
        if segment.is_empty() {
            return Err(PointerError::EmptySegment(raw.to_string()));
        }
        unescape_segment(segment).ok_or_else(|| PointerError::InvalidEscape(raw.to_string()))?;
    }
    Ok(format!("/{body}"))
}

/// Unescaped segments of a pointer. The root has none.
pub fn segments(ptr: &str) -> Result<Vec<String>, PointerError> {
    let normalized = normalize(ptr)?;
    if normalized == ROOT {
        return Ok(Vec::new());
    }
    normalized[1..]
        .split('/')
        .map(|segment| {
            unescape_segment(segment).ok_or_else(|| PointerError::InvalidEscape(ptr.to_string()))
        })
        .collect()
}

/// Builds a pointer from unescaped segments.
pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> String {
    if segments.is_empty() {
        return ROOT.to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&escape_segment(segment.as_ref()));
    }
    out
}

pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

pub fn unescape_segment(segment: &str) -> Option<String> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(ch) = chars.next() {
        if ch == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(ch);
        }
    }
    Some(out)
}

/// Number of segments below the root.
pub fn depth(ptr: &str) -> usize {
    match normalize(ptr) {
        Ok(normalized) if normalized == ROOT => 0,
        Ok(normalized) => normalized.matches('/').count(),
        Err(_) => 0,
    }
}

/// Joins a scope-relative pointer onto a scope path.
pub fn resolve(scope: &str, relative: &str) -> Result<String, PointerError> {
    let scope = normalize(scope)?;
    let relative = normalize(relative)?;
    Ok(match (scope.as_str(), relative.as_str()) {
        (ROOT, _) => relative,
        (_, ROOT) => scope,
        _ => format!("{scope}{relative}"),
    })
}

/// Inverse of [`resolve`]: the path of `absolute` as seen from inside `scope`.
pub fn relativize(scope: &str, absolute: &str) -> Result<String, PointerError> {
    let scope = normalize(scope)?;
    let absolute = normalize(absolute)?;
    if !is_within(&scope, &absolute) {
        return Err(PointerError::OutsideScope {
            scope,
            path: absolute,
        });
    }
    if scope == ROOT {
        return Ok(absolute);
    }
    let rest = &absolute[scope.len()..];
    Ok(if rest.is_empty() {
        ROOT.to_string()
    } else {
        rest.to_string()
    })
}

/// Segment-boundary prefix test. A scope contains itself.
pub fn is_within(scope: &str, path: &str) -> bool {
    let (Ok(scope), Ok(path)) = (normalize(scope), normalize(path)) else {
        return false;
    };
    if scope == ROOT {
        return true;
    }
    path == scope
        || path
            .strip_prefix(scope.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Splits a pointer into its parent pointer and unescaped last segment.
pub fn split_last(ptr: &str) -> Result<Option<(String, String)>, PointerError> {
    let mut segments = segments(ptr)?;
    let Some(last) = segments.pop() else {
        return Ok(None);
    };
    Ok(Some((from_segments(&segments), last)))
}

/// Locates engine-owned contract storage on a path.
///
/// Returns the owning scope path and reserved key when any `contracts/<reserved>` pair appears
/// along the path.
pub fn reserved_storage(ptr: &str) -> Option<(String, String)> {
    let segments = segments(ptr).ok()?;
    segments.windows(2).enumerate().find_map(|(idx, pair)| {
        (pair[0] == CONTRACTS_KEY && RESERVED_CONTRACT_KEYS.contains(&pair[1].as_str()))
            .then(|| (from_segments(&segments[..idx]), pair[1].clone()))
    })
}

/// Absolute pointer of a scope's whole `contracts` map.
pub fn contracts_map(scope: &str) -> String {
    let scope = normalize(scope).unwrap_or_else(|_| ROOT.to_string());
    if scope == ROOT {
        format!("/{CONTRACTS_KEY}")
    } else {
        format!("{scope}/{CONTRACTS_KEY}")
    }
}

/// Absolute pointer of a contract slot in a scope.
pub fn contract_path(scope: &str, key: &str) -> String {
    let scope = normalize(scope).unwrap_or_else(|_| ROOT.to_string());
    let suffix = format!("/{CONTRACTS_KEY}/{}", escape_segment(key));
    if scope == ROOT {
        suffix
    } else {
        format!("{scope}{suffix}")
    }
}

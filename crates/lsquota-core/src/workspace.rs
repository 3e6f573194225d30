//! Workspace identifiers as computed by the language server.
//!
//! The server passes `--workspace_id=<id>` where `<id>` is derived from the
//! workspace root URI. Matching it against our own roots is the strongest
//! signal for picking the right server when several IDE windows are open.
//!
//! The derivation below was captured from real server output. Changing it
//! without checking against a running server breaks exact matches.

use std::path::Path;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left alone by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Path syntax of the workspace root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// `C:\Users\me\project`
    Windows,
    /// `/home/me/project`
    Unix,
}

impl PathStyle {
    /// Style of the host OS
    pub fn current() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Unix
        }
    }
}

/// Map a workspace root to the server's workspace identifier.
///
/// ```
/// use lsquota_core::workspace::{normalize, PathStyle};
///
/// assert_eq!(
///     normalize(r"V:\DevSpace\daisy-box", PathStyle::Windows),
///     "file_v_3A_DevSpace_daisy_box"
/// );
/// assert_eq!(
///     normalize("/home/user/my-project", PathStyle::Unix),
///     "file_home_user_my_project"
/// );
/// ```
pub fn normalize(path: &str, style: PathStyle) -> String {
    match style {
        PathStyle::Windows => normalize_windows(path),
        PathStyle::Unix => normalize_unix(path),
    }
}

fn normalize_windows(path: &str) -> String {
    let (drive, rest) = split_drive(path);
    let rest = rest.trim_matches(['\\', '/']);
    let encoded = encode_segments(rest.split(['\\', '/'])).join("_");
    let rest = replace_non_alphanumeric(&encoded);

    match drive {
        Some(drive) => format!("file_{}_3A_{}", drive.to_ascii_lowercase(), rest),
        // UNC or relative path: no drive component to encode
        None => format!("file_{}", rest.trim_matches('_')),
    }
}

fn normalize_unix(path: &str) -> String {
    let encoded = encode_segments(path.split('/')).join("/");
    let replaced = replace_non_alphanumeric(&encoded);
    format!("file_{}", replaced.trim_matches('_'))
}

/// Split `C:` off the front of a Windows path
fn split_drive(path: &str) -> (Option<char>, &str) {
    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic() => (Some(letter), &path[2..]),
        _ => (None, path),
    }
}

fn encode_segments<'a>(segments: impl Iterator<Item = &'a str>) -> Vec<String> {
    segments
        .map(|s| utf8_percent_encode(s, URI_COMPONENT).to_string())
        .collect()
}

fn replace_non_alphanumeric(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Identifiers for every open workspace root
pub fn expected_ids<P: AsRef<Path>>(roots: &[P], style: PathStyle) -> Vec<String> {
    let mut ids: Vec<String> = roots
        .iter()
        .map(|root| normalize(&root.as_ref().to_string_lossy(), style))
        .collect();
    ids.dedup();
    ids
}

/// Comparison key that ignores `.`, `_`, `-` and case
fn loose_key(id: &str) -> String {
    id.chars()
        .filter(|c| !matches!(c, '.' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// True if two identifiers are equal ignoring separators and case
pub fn loose_eq(a: &str, b: &str) -> bool {
    loose_key(a) == loose_key(b)
}

/// How a candidate's workspace identifier relates to ours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceMatch {
    /// Identical to one of the expected identifiers
    Exact,
    /// Equal only when ignoring separators and case
    Loose,
    /// Known and different from every expected identifier
    Mismatch,
    /// Candidate has no identifier, or we have no workspace open
    Unknown,
}

/// Compare a candidate's `--workspace_id` against the expected set
pub fn classify(candidate_id: Option<&str>, expected: &[String]) -> WorkspaceMatch {
    let Some(id) = candidate_id else {
        return WorkspaceMatch::Unknown;
    };
    if expected.is_empty() {
        return WorkspaceMatch::Unknown;
    }
    if expected.iter().any(|e| e == id) {
        WorkspaceMatch::Exact
    } else if expected.iter().any(|e| loose_eq(e, id)) {
        WorkspaceMatch::Loose
    } else {
        WorkspaceMatch::Mismatch
    }
}

//! Session name generation and validation.

use protocol::SessionType;

/// Label derived from a working directory: its last path component.
///
/// Trailing slashes are ignored and the filesystem root becomes `root`.
/// `.` and `:` are replaced with `_` because the multiplexer reads them as
/// window and pane separators in targets.
pub fn dir_label(workdir: &str) -> String {
    let trimmed = workdir.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or_default();
    if base.is_empty() {
        return "root".to_string();
    }
    base.replace(['.', ':'], "_")
}

/// Next free name of the form `<dir>-<type>-<n>`.
///
/// `n` is one more than the highest suffix among `existing` names sharing the
/// prefix, so the result never collides with any of them.
pub fn generate_name<'a, I>(workdir: &str, session_type: SessionType, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix = format!("{}-{}-", dir_label(workdir), session_type.as_str());
    let highest = existing
        .into_iter()
        .filter_map(|name| name.strip_prefix(&prefix))
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{prefix}{}", highest + 1)
}

/// Whether `name` can be used as a session name.
///
/// Rejects empty names, surrounding whitespace, control characters, and the
/// target separators `.` and `:`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && !name.chars().any(|c| c == '.' || c == ':' || c.is_control())
}

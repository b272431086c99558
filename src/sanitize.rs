//! Database name sanitization.

/// Replacement for every run of rejected characters.
const PLACEHOLDER: char = '_';

fn is_permitted(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// Sanitizes a database base name so that it neither traverses out of the
/// database directory nor smuggles in SQLite driver options.
///
/// Only ASCII alphanumerics, dots, dashes and underscores survive. Each run of
/// other characters becomes a single `_`, and each run of dot pairs (`..`,
/// `....`, ...) becomes a single `_` too.
///
/// ```
/// assert_eq!(ieddata::sanitize("../abc?foo=bar"), "__abc_foo_bar");
/// assert_eq!(ieddata::sanitize("platformbox.db"), "platformbox.db");
/// ```
pub fn sanitize(name: &str) -> String {
    let mut permitted = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if is_permitted(c) {
            permitted.push(c);
            in_run = false;
        } else if !in_run {
            permitted.push(PLACEHOLDER);
            in_run = true;
        }
    }

    let mut sanitized = permitted;
    while sanitized.contains("..") {
        sanitized = collapse_dot_pairs(&sanitized);
    }
    sanitized
}

fn collapse_dot_pairs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find("..") {
        out.push_str(&rest[..pos]);
        out.push(PLACEHOLDER);
        rest = &rest[pos + 2..];
        while let Some(tail) = rest.strip_prefix("..") {
            rest = tail;
        }
    }
    out.push_str(rest);
    out
}

/// Returns a copy of `s` with only its first character in lower case.
///
/// This is how record field names map onto column names by default, e.g.
/// `VersionStatus` becomes `versionStatus`.
pub fn first_lower(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

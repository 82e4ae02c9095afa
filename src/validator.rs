//! Name validation mirroring the server's own rules so bad paths are
//! rejected before any network round-trip. Pure, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;

static FOLDER_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").unwrap());
static SITE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").unwrap());

const CONTAINS_ANYWHERE_DENYLIST: &[&str] = &[
    "admin", "system", "root", "api", "auth", "login", "logout", "signup", "signin", "security",
    "password", "secret", "config", "internal", "private", "superuser", "sudo", "staff", "owner",
    "billing",
];

const EQUALS_EXACT_DENYLIST: &[&str] = &[
    "index", "home", "about", "contact", "help", "support", "terms", "privacy", "status",
    "health", "healthz", "metrics", "favicon", "robots", "sitemap", "static", "assets",
    "public", "private", "www", "mail", "ftp", "ns1", "ns2", "test", "staging", "dev",
    "production", "app", "apps", "dashboard", "account", "accounts", "settings", "profile",
    "user", "users", "null", "undefined", "true", "false", "new", "edit", "delete", "create",
    "update", "list", "download", "upload", "files", "sync", "blog", "docs", "api-docs",
];

const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationType {
    Site,
    Folder,
    Upload,
}

impl ValidationType {
    fn as_str(self) -> &'static str {
        match self {
            ValidationType::Site => "site",
            ValidationType::Folder => "folder",
            ValidationType::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<String>,
    pub kind: ValidationType,
}

impl ValidationResult {
    fn ok(kind: ValidationType) -> Self {
        Self {
            valid: true,
            error: None,
            kind,
        }
    }

    fn err(kind: ValidationType, msg: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(msg.into()),
            kind,
        }
    }
}

pub fn validate_folder_segment(segment: &str) -> ValidationResult {
    if segment.len() > 255 {
        return ValidationResult::err(
            ValidationType::Folder,
            format!("folder segment '{segment}' exceeds 255 characters"),
        );
    }
    if !FOLDER_SEGMENT_RE.is_match(segment) {
        return ValidationResult::err(
            ValidationType::Folder,
            format!("folder segment '{segment}' must match ^[a-z0-9_-]+$"),
        );
    }
    ValidationResult::ok(ValidationType::Folder)
}

pub fn validate_site_name(name: &str) -> ValidationResult {
    let len = name.chars().count();
    if len == 0 || len > 63 {
        return ValidationResult::err(
            ValidationType::Site,
            format!("site name '{name}' must be 1-63 characters"),
        );
    }
    if !SITE_NAME_RE.is_match(name) {
        return ValidationResult::err(
            ValidationType::Site,
            format!("site name '{name}' contains invalid characters"),
        );
    }
    if name.starts_with('-') || name.ends_with('-') {
        return ValidationResult::err(
            ValidationType::Site,
            format!("site name '{name}' cannot start or end with a hyphen"),
        );
    }
    if name.contains("--") {
        return ValidationResult::err(
            ValidationType::Site,
            format!("site name '{name}' cannot contain consecutive hyphens"),
        );
    }
    let lower = name.to_lowercase();
    if EQUALS_EXACT_DENYLIST.contains(&lower.as_str()) {
        return ValidationResult::err(
            ValidationType::Site,
            format!("site name '{name}' is a reserved word"),
        );
    }
    if CONTAINS_ANYWHERE_DENYLIST
        .iter()
        .any(|word| lower.contains(word))
    {
        return ValidationResult::err(
            ValidationType::Site,
            format!("site name '{name}' contains a reserved word"),
        );
    }
    ValidationResult::ok(ValidationType::Site)
}

/// Validates every segment of a relative path (folders + the `.html`-stripped
/// leaf). `relative_path` is expected to be a forward-slash path that still
/// carries the `.html` suffix.
pub fn validate_path(relative_path: &str) -> ValidationResult {
    let trimmed = relative_path.trim_start_matches('/');
    let site_name = trimmed.strip_suffix(".html").unwrap_or(trimmed);
    let mut segments: Vec<&str> = site_name.split('/').collect();
    let Some(leaf) = segments.pop() else {
        return ValidationResult::err(ValidationType::Folder, "empty path");
    };

    if segments.len() > 5 {
        return ValidationResult::err(
            ValidationType::Folder,
            format!("path '{relative_path}' exceeds maximum depth of 5 folders"),
        );
    }

    for segment in &segments {
        let result = validate_folder_segment(segment);
        if !result.valid {
            return result;
        }
    }

    validate_site_name(leaf)
}

pub fn validate_username(username: &str) -> ValidationResult {
    if username.trim().is_empty() {
        return ValidationResult::err(ValidationType::Site, "username must not be empty");
    }
    validate_site_name(username)
}

/// Non-HTML upload names (currently a non-syncing placeholder per spec).
pub fn validate_upload_name(name: &str) -> ValidationResult {
    if name.is_empty() || name.len() > 255 {
        return ValidationResult::err(
            ValidationType::Upload,
            format!("upload name '{name}' must be 1-255 bytes"),
        );
    }
    if name.chars().any(|c| c.is_control()) {
        return ValidationResult::err(
            ValidationType::Upload,
            format!("upload name '{name}' contains control characters"),
        );
    }
    const FORBIDDEN: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];
    if name.chars().any(|c| FORBIDDEN.contains(&c)) {
        return ValidationResult::err(
            ValidationType::Upload,
            format!("upload name '{name}' contains a forbidden character"),
        );
    }
    if name.starts_with('.') || name.ends_with('.') {
        return ValidationResult::err(
            ValidationType::Upload,
            format!("upload name '{name}' cannot start or end with a dot"),
        );
    }
    let stem = name.split('.').next().unwrap_or(name).to_uppercase();
    if WINDOWS_RESERVED_NAMES.contains(&stem.as_str()) {
        return ValidationResult::err(
            ValidationType::Upload,
            format!("upload name '{name}' is a reserved Windows device name"),
        );
    }
    if name.chars().any(|c| ('\u{FF00}'..='\u{FFEF}').contains(&c)) {
        return ValidationResult::err(
            ValidationType::Upload,
            format!("upload name '{name}' contains full-width punctuation"),
        );
    }
    ValidationResult::ok(ValidationType::Upload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_site_path() {
        let r = validate_path("home.html");
        assert!(r.valid, "{:?}", r.error);
    }

    #[test]
    fn accepts_nested_path_within_depth() {
        let r = validate_path("foo/bar/site.html");
        assert!(r.valid, "{:?}", r.error);
    }

    #[test]
    fn rejects_path_over_depth_limit() {
        let r = validate_path("a/b/c/d/e/f/site.html");
        assert!(!r.valid);
    }

    #[test]
    fn rejects_reserved_word_exact() {
        let r = validate_site_name("admin");
        assert!(!r.valid);
        assert_eq!(r.kind, ValidationType::Site);
    }

    #[test]
    fn rejects_reserved_word_substring() {
        let r = validate_site_name("my-admin-page");
        assert!(!r.valid);
    }

    #[test]
    fn rejects_leading_trailing_hyphen() {
        assert!(!validate_site_name("-foo").valid);
        assert!(!validate_site_name("foo-").valid);
    }

    #[test]
    fn rejects_consecutive_hyphens() {
        assert!(!validate_site_name("foo--bar").valid);
    }

    #[test]
    fn rejects_bad_folder_segment() {
        let r = validate_folder_segment("Foo Bar");
        assert!(!r.valid);
    }

    #[test]
    fn upload_name_rejects_forbidden_chars_and_reserved_devices() {
        assert!(!validate_upload_name("a/b.txt").valid);
        assert!(!validate_upload_name("CON.txt").valid);
        assert!(!validate_upload_name(".hidden").valid);
        assert!(validate_upload_name("notes.txt").valid);
    }
}

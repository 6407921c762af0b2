//! Path-string utilities shared by every backend.
//!
//! Backend paths are slash-separated, relative, and carry no leading or
//! trailing slash. The empty string is the backend root.

use crate::error::StorageError;

/// Normalize separators and strip leading/trailing slashes.
///
/// Backslashes become forward slashes and empty segments (`a//b`) collapse.
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Generate a URL-friendly slug from text.
///
/// Lowercases, drops anything that is not a word character, whitespace or `-`,
/// then collapses runs of whitespace and dashes into a single dash.
pub fn generate_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.to_lowercase().chars() {
        if c.is_whitespace() || c == '-' {
            pending_dash = true;
        } else if c.is_alphanumeric() || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        }
    }

    slug
}

/// Slug for a file name: the stem is slugified, the extension is kept as-is.
pub fn file_slug(filename: &str) -> String {
    let (stem, extension) = split_extension(filename);
    format!("{}{}", generate_slug(stem), extension)
}

/// Split `name` into stem and extension (including the dot).
///
/// Dotfiles (`.env`) and trailing dots (`name.`) have no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Join a folder path and a name. An empty folder means the backend root.
pub fn join_path(folder: &str, name: &str) -> String {
    let folder = normalize_path(folder);
    let name = normalize_path(name);
    match (folder.is_empty(), name.is_empty()) {
        (true, _) => name,
        (false, true) => folder,
        (false, false) => format!("{}/{}", folder, name),
    }
}

/// Last segment of a path (`a/b/c.txt` -> `c.txt`).
pub fn last_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

/// Parent of a normalized path, empty for top-level entries.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Every ancestor prefix of a folder path, shortest first (`a/b` -> `a`, `a/b`).
pub fn ancestors(folder: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for segment in folder.split('/').filter(|s| !s.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Reject relative-navigation segments so a path cannot escape the backend root.
pub fn validate_relative(path: &str) -> Result<(), StorageError> {
    if path.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(StorageError::InvalidPath(format!(
            "relative segments are not allowed: {}",
            path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("/"), "");
        assert_eq!(normalize_path("/a/b/"), "a/b");
        assert_eq!(normalize_path("a\\b\\c"), "a/b/c");
        assert_eq!(normalize_path("a//b"), "a/b");
        assert_eq!(normalize_path("accepted_invites/Project X"), "accepted_invites/Project X");
    }

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Hello World"), "hello-world");
        assert_eq!(generate_slug("  Q3 -- Report!  "), "q3-report");
        assert_eq!(generate_slug("0 ITB's & Plan Link"), "0-itbs-plan-link");
        assert_eq!(generate_slug("snake_case_name"), "snake_case_name");
        assert_eq!(generate_slug("---"), "");
        assert_eq!(generate_slug("Café Menu"), "café-menu");
    }

    #[test]
    fn test_file_slug_keeps_extension() {
        assert_eq!(file_slug("Q3 Report.PDF"), "q3-report.PDF");
        assert_eq!(file_slug("archive.tar.gz"), "archivetar.gz");
        assert_eq!(file_slug(".env"), "env");
        assert_eq!(file_slug("README"), "readme");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "file.txt"), "file.txt");
        assert_eq!(join_path("/a/b/", "file.txt"), "a/b/file.txt");
        assert_eq!(join_path("a", ""), "a");
    }

    #[test]
    fn test_segments() {
        assert_eq!(last_segment("sub/dir/report.pdf"), "report.pdf");
        assert_eq!(last_segment("sub\\dir\\report.pdf"), "report.pdf");
        assert_eq!(last_segment("report.pdf"), "report.pdf");
        assert_eq!(last_segment("a/b/"), "b");
        assert_eq!(parent_path("a/b/c.txt"), "a/b");
        assert_eq!(parent_path("c.txt"), "");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("a/b/c"), vec!["a", "a/b", "a/b/c"]);
        assert!(ancestors("").is_empty());
    }

    #[test]
    fn test_validate_relative() {
        assert!(validate_relative("a/b/c").is_ok());
        assert!(validate_relative("").is_ok());
        assert!(validate_relative("a/../b").is_err());
        assert!(validate_relative("./a").is_err());
        assert!(validate_relative("a/..b").is_ok());
    }
}

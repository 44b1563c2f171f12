//! Loading the list of URLs to watch.

use crate::config::ConfigError;
use reqwest::Url;
use std::path::Path;

/// Read one absolute URL per line from `path`.
///
/// Surrounding whitespace is trimmed and blank lines are skipped. Duplicates
/// are kept: every line becomes its own resource.
pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::IoError(e),
    })?;

    let links = parse_targets(&contents)?;
    if links.is_empty() {
        return Err(ConfigError::EmptyList(path.to_path_buf()));
    }
    Ok(links)
}

/// Parse URL list contents. An empty result is not an error here.
pub fn parse_targets(contents: &str) -> Result<Vec<String>, ConfigError> {
    let mut links = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let link = line.trim();
        if link.is_empty() {
            continue;
        }

        let url = Url::parse(link).map_err(|e| ConfigError::InvalidUrl {
            line: index + 1,
            url: link.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                line: index + 1,
                url: link.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        links.push(link.to_string());
    }

    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_trims_and_skips_blank_lines() {
        let contents = "  https://example.com/  \n\n\thttp://example.org/a?b=c\n   \n";
        let links = parse_targets(contents).unwrap();
        assert_eq!(links, vec!["https://example.com/", "http://example.org/a?b=c"]);
    }

    #[test]
    fn test_parse_keeps_duplicates_in_order() {
        let contents = "http://a.test/\nhttp://b.test/\nhttp://a.test/\n";
        let links = parse_targets(contents).unwrap();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0], links[2]);
    }

    #[test]
    fn test_parse_rejects_relative_url() {
        let err = parse_targets("http://ok.test/\n/relative/path\n").unwrap_err();
        match err {
            ConfigError::InvalidUrl { line, url, .. } => {
                assert_eq!(line, 2);
                assert_eq!(url, "/relative/path");
            }
            other => panic!("Expected InvalidUrl, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        let err = parse_targets("ftp://files.test/readme\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { line: 1, .. }));
    }

    #[test]
    fn test_load_empty_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "\n   \n").unwrap();

        let err = load_targets(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyList(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_targets("/nonexistent/urls.txt").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "https://example.com/\nhttps://example.org/").unwrap();

        let links = load_targets(file.path()).unwrap();
        assert_eq!(links, vec!["https://example.com/", "https://example.org/"]);
    }
}

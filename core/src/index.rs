use serde::{Deserialize, Serialize};
use std::fmt;

pub type SiteId = u64;
pub type PageId = u64;
pub type LemmaId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SiteStatus::Indexing => "INDEXING",
            SiteStatus::Indexed => "INDEXED",
            SiteStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    /// Root URL without a trailing slash; page paths are relative to it.
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    /// Unix seconds of the last status change.
    pub status_time: i64,
    /// Only set while `status` is `Failed`.
    pub last_error: Option<String>,
}

impl Site {
    /// Apply a status transition, keeping `last_error` consistent with it.
    pub fn transition(&mut self, status: SiteStatus, error: Option<&str>) {
        self.status = status;
        self.status_time = now_unix();
        self.last_error = match status {
            SiteStatus::Failed => error.map(str::to_string).or_else(|| self.last_error.take()),
            _ => None,
        };
    }

    /// Path of `url` relative to this site's root, `/` for the root itself.
    pub fn relative_path(&self, url: &str) -> String {
        relative_path(&self.url, url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    pub path: String,
    pub code: u16,
    /// Raw HTML as fetched.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub text: String,
    /// Number of distinct pages on the site with a posting for this lemma.
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    /// Occurrences of the lemma on the page.
    pub weight: f32,
}

/// True when `url` is `root` itself or lies below it. The character after the
/// root must start a path, query or fragment, so `https://a.test` does not
/// cover `https://a.test.evil.org`.
pub fn is_under(root: &str, url: &str) -> bool {
    match url.strip_prefix(root) {
        Some(rest) => root.ends_with('/') || rest.is_empty() || rest.starts_with(|c: char| matches!(c, '/' | '?' | '#')),
        None => false,
    }
}

pub fn relative_path(root: &str, url: &str) -> String {
    let rest = if is_under(root, url) { &url[root.len()..] } else { url };
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> Site {
        Site {
            id: 1,
            url: "https://example.com".into(),
            name: "Example".into(),
            status: SiteStatus::Indexing,
            status_time: 0,
            last_error: None,
        }
    }

    #[test]
    fn relative_paths() {
        let s = site();
        assert_eq!(s.relative_path("https://example.com"), "/");
        assert_eq!(s.relative_path("https://example.com/"), "/");
        assert_eq!(s.relative_path("https://example.com/docs/a.html"), "/docs/a.html");
    }

    #[test]
    fn lookalike_hosts_are_not_under_the_root() {
        let root = "https://a.test";
        assert!(is_under(root, root));
        assert!(is_under(root, "https://a.test/x"));
        assert!(is_under(root, "https://a.test?q=1"));
        assert!(is_under("https://a.test/", "https://a.test/x"));
        assert!(!is_under(root, "https://a.testing.org/x"));
        assert!(!is_under(root, "https://a.test.evil.org/steal"));
        assert!(!is_under(root, "https://a.test:8080/"));
        assert!(!is_under("https://a.test/blog", "https://a.test/blogroll"));
    }

    #[test]
    fn last_error_only_kept_when_failed() {
        let mut s = site();
        s.transition(SiteStatus::Failed, Some("timeout"));
        assert_eq!(s.last_error.as_deref(), Some("timeout"));
        assert!(s.status_time > 0);
        s.transition(SiteStatus::Indexing, None);
        assert_eq!(s.last_error, None);
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&SiteStatus::Indexed).unwrap();
        assert_eq!(json, "\"INDEXED\"");
    }
}

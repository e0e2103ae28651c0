//! The page's current URL as seen by the bridge and the listener.

use std::sync::RwLock;

use url::Url;

/// Read and replace the page URL without navigating.
pub trait PageLocation: Send + Sync {
    fn href(&self) -> String;
    /// History-replace the current URL.
    fn replace(&self, href: &str);
}

/// Location held in memory.
#[derive(Debug)]
pub struct StaticLocation {
    href: RwLock<String>,
}

impl StaticLocation {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: RwLock::new(href.into()),
        }
    }
}

impl PageLocation for StaticLocation {
    fn href(&self) -> String {
        self.href
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn replace(&self, href: &str) {
        if let Ok(mut guard) = self.href.write() {
            *guard = href.to_string();
        }
    }
}

/// Remove every `flag` query parameter from `href`.
///
/// Returns `None` when the URL does not parse or carries no such parameter.
pub fn strip_query_flag(href: &str, flag: &str) -> Option<String> {
    let mut url = Url::parse(href).ok()?;
    if !url.query_pairs().any(|(key, _)| key == flag) {
        return None;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != flag)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

/// `host[:port]` and path of `href`, or empty strings when it does not parse.
pub fn host_and_path(href: &str) -> (String, String) {
    match Url::parse(href) {
        Ok(url) => {
            let host = match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => String::new(),
            };
            (host, url.path().to_string())
        }
        Err(_) => (String::new(), String::new()),
    }
}

//! API path builder
//!
//! Explicit value type for daemon endpoint paths. Segments are stored
//! decoded and percent-encoded on display, so names with spaces or slashes
//! cannot escape their segment.

use std::fmt;

/// API version prefix
pub const API_VERSION: &str = "1.0";

/// An endpoint path such as `/1.0/instances/c1/exec?project=default`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiPath {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl ApiPath {
    /// `/1.0`
    pub fn root() -> Self {
        Self {
            segments: vec![API_VERSION.to_string()],
            query: Vec::new(),
        }
    }

    /// `/1.0/<collection>`
    pub fn collection(name: &str) -> Self {
        Self::root().join(name)
    }

    /// Append one path segment.
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Parse a path as returned by the daemon, e.g. in list responses or the
    /// `operation` field of an async envelope. Query parameters are kept.
    pub fn parse(raw: &str) -> Self {
        let (path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        };

        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode)
            .collect();

        let query = query
            .map(|q| {
                q.split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((k, v)) => (decode(k), decode(v)),
                        None => (decode(pair), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self { segments, query }
    }

    /// Last path segment, typically a resource name or id.
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Same path without query parameters.
    pub fn without_query(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            query: Vec::new(),
        }
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

impl fmt::Display for ApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", urlencoding::encode(segment))?;
        }
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{}{}={}",
                sep,
                urlencoding::encode(key),
                urlencoding::encode(value)
            )?;
        }
        Ok(())
    }
}

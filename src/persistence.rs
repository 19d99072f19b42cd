//! Key-value persistence of experiment tokens.
//!
//! The engine only sees [`PersistencePort`]. Servers use [`HeaderCookieJar`]
//! (request `Cookie` in, `Set-Cookie` out); embedders that own a document-style
//! cookie store use [`DocumentCookieJar`].

use std::borrow::Cow;

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use indexmap::IndexMap;

pub const DEFAULT_COOKIE_PATH: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub max_age: u64,
    pub path: String,
}

impl CookieOptions {
    pub fn new(max_age: u64) -> Self {
        Self {
            max_age,
            path: DEFAULT_COOKIE_PATH.to_string(),
        }
    }
}

pub trait PersistencePort {
    /// Current value for `key`, or `None` when absent or no transport exists.
    fn read(&self, key: &str) -> Option<String>;
    /// Store `value` under `key`. A no-op when no transport exists.
    fn write(&mut self, key: &str, value: &str, options: &CookieOptions);
}

/// `name=value; Max-Age=N; Path=/` with the value percent-encoded.
pub fn serialize_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    format!(
        "{}={}; Max-Age={}; Path={}",
        name,
        urlencoding::encode(value),
        options.max_age,
        options.path
    )
}

fn decode_value(raw: &str) -> String {
    let raw = raw.trim().trim_matches('"');
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

/// Split a `Cookie` header into decoded `(name, value)` pairs. Pairs without
/// `=` are skipped.
pub fn parse_cookie_pairs(header: &str) -> impl Iterator<Item = (&str, String)> + '_ {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name, decode_value(value)))
    })
}

/// Server-side transport over HTTP headers.
#[derive(Debug, Default)]
pub struct HeaderCookieJar {
    cookie_header: Option<String>,
    set_cookies: Option<Vec<HeaderValue>>,
}

impl HeaderCookieJar {
    /// Reads from the request's `Cookie` headers and collects `Set-Cookie`
    /// values for the response.
    pub fn for_request(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            cookie_header: Some(joined),
            set_cookies: Some(Vec::new()),
        }
    }

    /// No request or response surface: reads return `None`, writes are dropped.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn set_cookie_values(&self) -> &[HeaderValue] {
        self.set_cookies.as_deref().unwrap_or(&[])
    }

    /// Append the collected `Set-Cookie` values, keeping any already present.
    pub fn apply(self, response_headers: &mut HeaderMap) {
        for value in self.set_cookies.unwrap_or_default() {
            response_headers.append(SET_COOKIE, value);
        }
    }
}

impl PersistencePort for HeaderCookieJar {
    fn read(&self, key: &str) -> Option<String> {
        let header = self.cookie_header.as_deref()?;
        parse_cookie_pairs(header)
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value)
    }

    fn write(&mut self, key: &str, value: &str, options: &CookieOptions) {
        let Some(set_cookies) = self.set_cookies.as_mut() else {
            return;
        };
        match HeaderValue::from_str(&serialize_cookie(key, value, options)) {
            Ok(header) => set_cookies.push(header),
            Err(e) => tracing::warn!(cookie = key, error = %e, "dropping unrepresentable cookie"),
        }
    }
}

/// Storage-API transport: a document cookie store holding `name=value` pairs.
#[derive(Debug, Default, Clone)]
pub struct DocumentCookieJar {
    cookies: IndexMap<String, String>,
    written: Vec<String>,
}

impl DocumentCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a `document.cookie` style string (`a=1; b=2`).
    pub fn from_cookie_string(cookie_string: &str) -> Self {
        let cookies = parse_cookie_pairs(cookie_string)
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        Self {
            cookies,
            written: Vec::new(),
        }
    }

    pub fn cookie_string(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Serialized cookies written since construction, oldest first.
    pub fn written(&self) -> &[String] {
        &self.written
    }
}

impl PersistencePort for DocumentCookieJar {
    fn read(&self, key: &str) -> Option<String> {
        self.cookies.get(key).cloned()
    }

    fn write(&mut self, key: &str, value: &str, options: &CookieOptions) {
        if options.max_age == 0 {
            self.cookies.shift_remove(key);
        } else {
            self.cookies.insert(key.to_string(), value.to_string());
        }
        self.written.push(serialize_cookie(key, value, options));
    }
}

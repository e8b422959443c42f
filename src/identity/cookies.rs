use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::{header::COOKIE, HeaderMap};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Cookies attached to an inbound request, by name. Later duplicates win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(BTreeMap<String, String>);

impl Cookies {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut out = BTreeMap::new();
        for value in headers.get_all(COOKIE).iter() {
            let Ok(s) = value.to_str() else { continue };
            for part in s.split(';') {
                let p = part.trim();
                if let Some((k, v)) = p.split_once('=') {
                    let k = k.trim();
                    if !k.is_empty() {
                        out.insert(k.to_string(), v.trim().to_string());
                    }
                }
            }
        }
        Cookies(out)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn access_token(&self) -> Option<&str> { self.get(ACCESS_COOKIE) }

    pub fn refresh_token(&self) -> Option<&str> { self.get(REFRESH_COOKIE) }

    pub fn has_session_cookie(&self) -> bool {
        self.access_token().is_some() || self.refresh_token().is_some()
    }
}

/// `Set-Cookie` value for a session cookie: HttpOnly, SameSite=Lax, scoped to `/`.
pub fn set_cookie(name: &str, value: &str, max_age: Duration, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        name,
        value,
        max_age.as_secs(),
        if secure { "; Secure" } else { "" }
    )
}

pub fn clear_cookie(name: &str, secure: bool) -> String {
    format!(
        "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax; Path=/{}",
        name,
        if secure { "; Secure" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_multiple_headers_and_pairs() {
        let mut h = HeaderMap::new();
        h.append(COOKIE, HeaderValue::from_static("theme=dark; access_token=abc"));
        h.append(COOKIE, HeaderValue::from_static("refresh_token=def;junk; =x"));
        let c = Cookies::from_headers(&h);
        assert_eq!(c.access_token(), Some("abc"));
        assert_eq!(c.refresh_token(), Some("def"));
        assert_eq!(c.get("theme"), Some("dark"));
        assert_eq!(c.get("junk"), None);
        assert!(c.has_session_cookie());
    }

    #[test]
    fn empty_values_count_as_absent() {
        let mut h = HeaderMap::new();
        h.insert(COOKIE, HeaderValue::from_static("access_token=; refresh_token="));
        let c = Cookies::from_headers(&h);
        assert!(!c.has_session_cookie());
        assert!(!Cookies::default().has_session_cookie());
    }

    #[test]
    fn cookie_attributes() {
        let s = set_cookie(ACCESS_COOKIE, "tok", Duration::from_secs(60), false);
        assert_eq!(s, "access_token=tok; HttpOnly; SameSite=Lax; Path=/; Max-Age=60");
        assert!(set_cookie(REFRESH_COOKIE, "t", Duration::from_secs(1), true).ends_with("; Secure"));
        assert!(clear_cookie(ACCESS_COOKIE, false).starts_with("access_token=; Max-Age=0"));
    }
}

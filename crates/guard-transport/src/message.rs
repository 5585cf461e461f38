//! Request and response values passed through the interceptor.

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::transport::TransportError;

/// Base used to resolve relative targets when extracting the path.
const RELATIVE_BASE: &str = "http://localhost/";

/// A call as described by the caller.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Absolute URL or path relative to the page origin.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl OutboundRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a raw body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body and content type.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, TransportError> {
        self.body = Some(serde_json::to_vec(value)?);
        self.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }

    /// Path component of the target, without query or fragment.
    pub fn path(&self) -> Result<String, TransportError> {
        self.canonical().map(|canonical| canonical.path)
    }

    /// Normalized form of the target.
    ///
    /// Unreserved characters are percent-decoded and repeated `/` are
    /// collapsed. Encoded separators, encoded `%`, malformed escapes and
    /// dot segments are rejected.
    pub fn canonical(&self) -> Result<CanonicalTarget, TransportError> {
        let invalid =
            |reason: String| TransportError::InvalidTarget(format!("{}: {}", self.target, reason));
        let (mut url, absolute) = match Url::parse(&self.target) {
            Ok(url) => (url, true),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let url = Url::parse(RELATIVE_BASE)
                    .and_then(|base| base.join(&self.target))
                    .map_err(|e| invalid(e.to_string()))?;
                (url, false)
            }
            Err(e) => return Err(invalid(e.to_string())),
        };

        let path = normalize_path(url.path()).map_err(invalid)?;
        let target = if absolute {
            url.set_path(&path);
            url.set_fragment(None);
            url.to_string()
        } else {
            match url.query() {
                Some(query) => format!("{}?{}", path, query),
                None => path.clone(),
            }
        };
        Ok(CanonicalTarget { path, target })
    }

    pub fn is_mutating(&self) -> bool {
        guard_security::is_mutating(&self.method)
    }
}

/// A target after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTarget {
    /// Path used for rate limiting, the session gate and permission checks.
    pub path: String,
    /// Target handed to the transport.
    pub target: String,
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

fn normalize_path(raw: &str) -> Result<String, String> {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let byte = raw
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.bytes().all(|digit| digit.is_ascii_hexdigit()))
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                let Some(byte) = byte else {
                    return Err("malformed percent escape".into());
                };
                if is_unreserved(byte) {
                    out.push(byte as char);
                } else if matches!(byte, b'/' | b'\\' | b'%') {
                    return Err(format!("encoded {:?} in path", byte as char));
                } else {
                    out.push_str(&format!("%{:02X}", byte));
                }
                i += 3;
            }
            b'\\' => return Err("backslash in path".into()),
            b'/' => {
                if !out.ends_with('/') {
                    out.push('/');
                }
                i += 1;
            }
            other => {
                out.push(other as char);
                i += 1;
            }
        }
    }
    if out.split('/').any(|segment| segment == "." || segment == "..") {
        return Err("dot segment in path".into());
    }
    if !out.starts_with('/') {
        out.insert(0, '/');
    }
    Ok(out)
}

/// A completed call.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl InboundResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON response body.
    pub fn json_body<T: Serialize + ?Sized>(
        status: StatusCode,
        value: &T,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(status).with_body(serde_json::to_vec(value)?))
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as UTF-8 text, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_extraction() {
        assert_eq!(
            OutboundRequest::get("/api/users?page=2").path().unwrap(),
            "/api/users"
        );
        assert_eq!(
            OutboundRequest::get("https://console.example.com/api/login#x")
                .path()
                .unwrap(),
            "/api/login"
        );
        assert_eq!(OutboundRequest::get("api/tasks").path().unwrap(), "/api/tasks");
    }

    #[test]
    fn test_canonical_path_decodes_and_collapses() {
        let canonical = |target: &str| OutboundRequest::get(target).canonical().unwrap();

        assert_eq!(canonical("/api/%61dmin/users").path, "/api/admin/users");
        assert_eq!(canonical("/api//admin///users").path, "/api/admin/users");
        assert_eq!(canonical("/api/%6Cogin").path, "/api/login");
        assert_eq!(canonical("/api/files/a%20b").path, "/api/files/a%20b");
        assert_eq!(canonical("/api/files/a%3fb").path, "/api/files/a%3Fb");
        assert_eq!(canonical("/api/%2e%2e/admin/users").path, "/admin/users");

        let relative = canonical("/api//tasks?page=2#top");
        assert_eq!(relative.target, "/api/tasks?page=2");
        let absolute = canonical("https://console.example.com//api/%61dmin?x=1");
        assert_eq!(absolute.target, "https://console.example.com/api/admin?x=1");
    }

    #[test]
    fn test_ambiguous_paths_rejected() {
        for target in [
            "/api/admin%2Fusers",
            "/api/%5Cadmin",
            "/api/%2561dmin",
            "/api/%zz",
        ] {
            assert!(
                matches!(
                    OutboundRequest::get(target).canonical(),
                    Err(TransportError::InvalidTarget(_))
                ),
                "{target}"
            );
        }
    }

    #[test]
    fn test_json_body() {
        let request = OutboundRequest::post("/api/tasks")
            .with_json(&serde_json::json!({"title": "x"}))
            .unwrap();
        assert_eq!(request.headers[http::header::CONTENT_TYPE], "application/json");
        assert!(request.is_mutating());

        let response = InboundResponse::json_body(StatusCode::OK, &vec!["a", "b"]).unwrap();
        let decoded: Vec<String> = response.json().unwrap();
        assert_eq!(decoded, vec!["a", "b"]);
    }
}

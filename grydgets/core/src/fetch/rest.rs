//! HTTP source

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{truncate, Source, DEFAULT_TIMEOUT};
use crate::error::FetchError;
use crate::extract::{value_to_text, Extraction};

/// Declarative description of an HTTP request
#[derive(Debug, Clone, Deserialize)]
pub struct RestSpec {
    /// Target URL
    pub url: String,

    /// HTTP method, case-insensitive
    #[serde(default = "default_method")]
    pub method: String,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Query parameters (non-string values are stringified)
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// JSON body, sent for POST and PUT only
    #[serde(default, alias = "payload")]
    pub body: Option<Value>,

    /// Authorization
    #[serde(default)]
    pub auth: Option<Auth>,

    /// Path/query applied to the decoded response
    #[serde(flatten)]
    pub extraction: Extraction,

    /// Request timeout in seconds
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Treat the body as text instead of JSON
    #[serde(default)]
    pub raw: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RestSpec {
    /// GET `url` with no extraction
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            auth: None,
            extraction: Extraction::default(),
            timeout: None,
            raw: false,
        }
    }
}

// ============================================================================
// Auth
// ============================================================================

/// Authorization header source
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "AuthRepr")]
pub enum Auth {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Basic base64(user:pass)`
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Auth::Bearer(***)"),
            Self::Basic { username, .. } => write!(f, "Auth::Basic({username}:***)"),
        }
    }
}

impl Auth {
    /// Value of the `Authorization` header
    pub fn header_value(&self) -> String {
        match self {
            Self::Bearer(token) => format!("Bearer {token}"),
            Self::Basic { username, password } => {
                format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
            }
        }
    }
}

/// Both the nested (`{bearer = ".."}`, `{basic = {username, password}}`)
/// and flat (`{type = "bearer", token}`, `{type = "basic", username, password}`)
/// spellings are accepted.
#[derive(Deserialize)]
struct AuthRepr {
    bearer: Option<String>,
    basic: Option<BasicRepr>,
    #[serde(rename = "type")]
    kind: Option<String>,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct BasicRepr {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl TryFrom<AuthRepr> for Auth {
    type Error = String;

    fn try_from(repr: AuthRepr) -> Result<Self, Self::Error> {
        if let Some(token) = repr.bearer {
            return Ok(Self::Bearer(token));
        }
        if let Some(basic) = repr.basic {
            return Ok(Self::Basic {
                username: basic.username,
                password: basic.password,
            });
        }
        match repr.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("bearer") => repr
                .token
                .map(Self::Bearer)
                .ok_or_else(|| "bearer auth needs a 'token'".to_string()),
            Some("basic") => Ok(Self::Basic {
                username: repr.username.unwrap_or_default(),
                password: repr.password.unwrap_or_default(),
            }),
            Some(other) => Err(format!("unsupported auth type '{other}'")),
            None => Err("auth needs 'bearer', 'basic' or 'type'".to_string()),
        }
    }
}

// ============================================================================
// RestSource
// ============================================================================

/// Performs one HTTP request per fetch
#[derive(Debug)]
pub struct RestSource {
    spec: RestSpec,
    method: Method,
    client: Client,
}

impl RestSource {
    /// Validate the request and build the HTTP client
    pub fn new(spec: RestSpec) -> Result<Self, FetchError> {
        let method = Method::from_bytes(spec.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::InvalidRequest(format!("bad method '{}'", spec.method)))?;
        if !(spec.url.starts_with("http://") || spec.url.starts_with("https://")) {
            return Err(FetchError::InvalidRequest(format!(
                "url must be http(s): '{}'",
                spec.url
            )));
        }
        spec.extraction
            .validate()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        let timeout = spec
            .timeout
            .filter(|t| t.is_finite() && *t > 0.0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs_f64);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            spec,
            method,
            client,
        })
    }

    /// The request description
    pub fn spec(&self) -> &RestSpec {
        &self.spec
    }
}

impl Source for RestSource {
    fn fetch(&self) -> Result<Value, FetchError> {
        let params: Vec<(&str, String)> = self
            .spec
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), value_to_text(v)))
            .collect();

        let mut request = self
            .client
            .request(self.method.clone(), &self.spec.url)
            .query(&params);
        for (name, value) in &self.spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = &self.spec.auth {
            request = request.header(AUTHORIZATION, auth.header_value());
        }
        if let Some(body) = &self.spec.body {
            if self.method == Method::POST || self.method == Method::PUT {
                request = request.json(body);
            }
        }

        debug!(url = %self.spec.url, method = %self.method, "Fetching");
        let response = request.send()?;
        let status = response.status().as_u16();
        let text = response.text()?;
        if status != 200 {
            return Err(FetchError::Http {
                status,
                body: truncate(text),
            });
        }

        let data = if self.spec.raw {
            Value::String(text)
        } else {
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))?
        };
        Ok(self.spec.extraction.apply(data)?)
    }

    fn describe(&self) -> String {
        self.spec.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Serve one canned HTTP response and hand back the raw request text
    fn serve_once(status: &str, body: &str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            tx.send(String::from_utf8_lossy(&buf).to_string()).unwrap();
        });
        (url, rx)
    }

    #[test]
    fn test_auth_spellings() {
        let nested: Auth = serde_json::from_value(json!({"bearer": "t"})).unwrap();
        let flat: Auth = serde_json::from_value(json!({"type": "bearer", "token": "t"})).unwrap();
        let basic: Auth =
            serde_json::from_value(json!({"basic": {"username": "u", "password": "p"}})).unwrap();
        let flat_basic: Auth =
            serde_json::from_value(json!({"type": "basic", "username": "u", "password": "p"}))
                .unwrap();

        assert_eq!(nested, flat);
        assert_eq!(basic, flat_basic);
        assert_eq!(nested.header_value(), "Bearer t");
        assert_eq!(basic.header_value(), "Basic dTpw");
        assert!(serde_json::from_value::<Auth>(json!({"type": "digest"})).is_err());
    }

    #[test]
    fn test_auth_debug_hides_secret() {
        let auth = Auth::Bearer("secret".into());
        assert!(!format!("{auth:?}").contains("secret"));
    }

    #[test]
    fn test_spec_deserialize_flattens_extraction() {
        let spec: RestSpec = serde_json::from_value(json!({
            "url": "http://x",
            "method": "post",
            "json_path": "a.b",
            "payload": {"q": 1}
        }))
        .unwrap();

        assert_eq!(spec.extraction, Extraction::path("a.b"));
        assert_eq!(spec.body, Some(json!({"q": 1})));
        assert_eq!(RestSource::new(spec).unwrap().method, Method::POST);
    }

    #[test]
    fn test_new_rejects_bad_requests() {
        let mut spec = RestSpec::get("ftp://nope");
        assert!(matches!(RestSource::new(spec.clone()), Err(FetchError::InvalidRequest(_))));

        spec.url = "http://ok".into();
        spec.method = "NOT A METHOD".into();
        assert!(matches!(RestSource::new(spec), Err(FetchError::InvalidRequest(_))));
    }

    #[test]
    fn test_fetch_extracts_and_sends_auth() {
        let (url, request) = serve_once("200 OK", r#"{"current": {"temp": 21}}"#);
        let mut spec = RestSpec::get(url);
        spec.extraction = Extraction::path("current.temp");
        spec.auth = Some(Auth::Bearer("tok".into()));
        spec.params.insert("units".into(), json!("metric"));

        let value = RestSource::new(spec).unwrap().fetch().unwrap();
        let raw = request.recv().unwrap();

        assert_eq!(value, json!(21));
        assert!(raw.starts_with("GET /?units=metric"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer tok"));
    }

    #[test]
    fn test_fetch_non_200_is_http_error() {
        let (url, _request) = serve_once("503 Service Unavailable", "down");
        let err = RestSource::new(RestSpec::get(url)).unwrap().fetch().unwrap_err();

        assert!(matches!(err, FetchError::Http { status: 503, ref body } if body == "down"));
    }

    #[test]
    fn test_fetch_raw_text() {
        let (url, _request) = serve_once("200 OK", "plain words");
        let mut spec = RestSpec::get(url);
        spec.raw = true;

        let value = RestSource::new(spec).unwrap().fetch().unwrap();
        assert_eq!(value, json!("plain words"));
    }

    #[test]
    fn test_fetch_connection_refused_is_transport() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let spec = RestSpec::get(format!("http://127.0.0.1:{port}/"));

        let err = RestSource::new(spec).unwrap().fetch().unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)), "got {err:?}");
    }
}

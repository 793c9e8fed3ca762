//! Request and response representations that flow through the interception layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// How the client issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level navigation (address bar, link click, reload)
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  /// Cross-origin request whose response the client cannot inspect
  NoCors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  #[default]
  Other,
}

impl FromStr for RequestMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "navigate" => Ok(Self::Navigate),
      "same-origin" => Ok(Self::SameOrigin),
      "cors" => Ok(Self::Cors),
      "no-cors" => Ok(Self::NoCors),
      other => Err(format!("unknown request mode '{}'", other)),
    }
  }
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "document" => Ok(Self::Document),
      "script" => Ok(Self::Script),
      "style" => Ok(Self::Style),
      "image" => Ok(Self::Image),
      "font" => Ok(Self::Font),
      "manifest" => Ok(Self::Manifest),
      "" | "other" => Ok(Self::Other),
      other => Err(format!("unknown destination '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RedirectMode {
  #[default]
  Follow,
  /// Redirects are not followed; a 3xx comes back as an opaque redirect
  Manual,
}

/// An intercepted request, identified by method and absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub redirect: RedirectMode,
}

impl Request {
  /// Plain GET for a subresource.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
      redirect: RedirectMode::default(),
    }
  }

  /// Top-level document navigation. Navigations do not follow redirects on
  /// their own, matching how user agents hand them to an interceptor.
  pub fn navigate(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      redirect: RedirectMode::Manual,
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_redirect(mut self, redirect: RedirectMode) -> Self {
    self.redirect = redirect;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Normalized cache identity: upper-cased method plus the absolute URL with
  /// its query preserved and fragment dropped.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    format!("{} {}", self.method.to_ascii_uppercase(), url)
  }
}

impl fmt::Display for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Response type as seen by the interceptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
  /// Same-origin response, fully inspectable
  #[default]
  Basic,
  /// Cross-origin response shared via CORS
  Cors,
  /// Cross-origin no-cors response; status and body are not trustworthy
  Opaque,
  /// Unfollowed redirect from a manual-redirect request
  OpaqueRedirect,
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::OpaqueRedirect => "opaqueredirect",
      Self::Error => "error",
    }
  }

  pub fn is_opaque(&self) -> bool {
    matches!(self, Self::Opaque | Self::OpaqueRedirect)
  }
}

impl FromStr for ResponseType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "opaqueredirect" => Ok(Self::OpaqueRedirect),
      "error" => Ok(Self::Error),
      other => Err(format!("unknown response type '{}'", other)),
    }
  }
}

/// A response representation: status, headers and body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Final URL after redirects (empty for opaque responses)
  pub url: String,
  pub response_type: ResponseType,
  pub redirected: bool,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: status_text(status).to_string(),
      headers: Vec::new(),
      body: body.into(),
      url: String::new(),
      response_type: ResponseType::Basic,
      redirected: false,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_ascii_lowercase(), value.to_string()));
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn with_url(mut self, url: &str) -> Self {
    self.url = url.to_string();
    self
  }

  pub fn with_redirected(mut self, redirected: bool) -> Self {
    self.redirected = redirected;
    self
  }

  /// Status in the 2xx range. Opaque responses never count: their status
  /// is not visible to the interceptor.
  pub fn ok(&self) -> bool {
    !self.response_type.is_opaque() && (200..300).contains(&self.status)
  }

  /// Exactly 200, not redirected, and a plain same-origin response.
  pub fn is_plain_success(&self) -> bool {
    self.status == 200 && !self.redirected && self.response_type == ResponseType::Basic
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

fn status_text(status: u16) -> &'static str {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("")
}

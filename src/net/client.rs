use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::{Origin, Url};

use super::types::{RedirectMode, Request, RequestMode, Response, ResponseType};
use crate::error::FetchError;

/// Upstream network access.
///
/// The returned future must be `Send` so strategies can run it on its own task.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}

/// reqwest-backed network client.
#[derive(Clone)]
pub struct HttpClient {
  follow: reqwest::Client,
  manual: reqwest::Client,
  origin: Origin,
}

impl HttpClient {
  pub fn new(origin: &Url, timeout: Duration) -> Result<Self> {
    let follow = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    let manual = reqwest::Client::builder()
      .timeout(timeout)
      .redirect(reqwest::redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      follow,
      manual,
      origin: origin.origin(),
    })
  }

  fn response_type(&self, request: &Request, status: u16) -> ResponseType {
    if request.redirect == RedirectMode::Manual && (300..400).contains(&status) {
      ResponseType::OpaqueRedirect
    } else if request.url.origin() == self.origin {
      ResponseType::Basic
    } else if request.mode == RequestMode::NoCors {
      ResponseType::Opaque
    } else {
      ResponseType::Cors
    }
  }

  async fn execute(&self, request: &Request) -> Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::network(&request.url, e))?;

    let client = match request.redirect {
      RedirectMode::Follow => &self.follow,
      RedirectMode::Manual => &self.manual,
    };

    let resp = client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| FetchError::network(&request.url, e))?;

    let status = resp.status().as_u16();
    let final_url = resp.url().clone();
    let headers: Vec<(String, String)> = resp
      .headers()
      .iter()
      .map(|(k, v)| {
        (
          k.as_str().to_string(),
          v.to_str().unwrap_or_default().to_string(),
        )
      })
      .collect();

    let body = resp
      .bytes()
      .await
      .map_err(|e| FetchError::network(&request.url, e))?;

    let response_type = self.response_type(request, status);
    debug!(
      "{} -> {} ({}, {} bytes)",
      request,
      status,
      response_type.as_str(),
      body.len()
    );

    let mut response = Response::new(status, body.to_vec())
      .with_type(response_type)
      .with_redirected(final_url != request.url);
    if !response_type.is_opaque() {
      response = response.with_url(final_url.as_str());
    }
    for (name, value) in &headers {
      response = response.with_header(name, value);
    }
    Ok(response)
  }
}

impl Network for HttpClient {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send {
    self.execute(request)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client() -> HttpClient {
    let origin = Url::parse("https://app.example.com/").unwrap();
    HttpClient::new(&origin, Duration::from_secs(5)).unwrap()
  }

  #[test]
  fn test_same_origin_is_basic() {
    let req = Request::get(Url::parse("https://app.example.com/app.js").unwrap());
    assert_eq!(client().response_type(&req, 200), ResponseType::Basic);
  }

  #[test]
  fn test_cross_origin_types() {
    let url = Url::parse("https://cdn.example.net/font.woff2").unwrap();
    let cors = Request::get(url.clone()).with_mode(RequestMode::Cors);
    let no_cors = Request::get(url).with_mode(RequestMode::NoCors);
    assert_eq!(client().response_type(&cors, 200), ResponseType::Cors);
    assert_eq!(client().response_type(&no_cors, 200), ResponseType::Opaque);
  }

  #[test]
  fn test_manual_redirect_is_opaque_redirect() {
    let req = Request::navigate(Url::parse("https://app.example.com/old").unwrap());
    assert_eq!(client().response_type(&req, 301), ResponseType::OpaqueRedirect);
    assert_eq!(client().response_type(&req, 200), ResponseType::Basic);
  }
}

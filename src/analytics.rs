//! Fire-and-forget usage events for the remote counter service.

use serde::Serialize;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
  Installed { version: String },
  Activated { version: String },
}

/// Posts events to the configured endpoint on a detached task. Nothing waits
/// for the result and failures are only logged.
#[derive(Clone)]
pub struct Analytics {
  endpoint: Option<Url>,
  client: reqwest::Client,
}

impl Analytics {
  pub fn new(endpoint: Option<Url>) -> Self {
    Self {
      endpoint,
      client: reqwest::Client::new(),
    }
  }

  pub fn disabled() -> Self {
    Self::new(None)
  }

  #[cfg(test)]
  pub fn is_enabled(&self) -> bool {
    self.endpoint.is_some()
  }

  pub fn emit(&self, event: AnalyticsEvent) {
    let Some(endpoint) = self.endpoint.clone() else {
      return;
    };

    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      debug!("No runtime, dropping analytics event {:?}", event);
      return;
    };

    let body = match serde_json::to_vec(&event) {
      Ok(body) => body,
      Err(e) => {
        debug!("Failed to encode analytics event: {}", e);
        return;
      }
    };

    let client = self.client.clone();
    runtime.spawn(async move {
      let result = client
        .post(endpoint.clone())
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await;

      match result {
        Ok(resp) => debug!("Analytics event sent to {} ({})", endpoint, resp.status()),
        Err(e) => debug!("Analytics event to {} failed: {}", endpoint, e),
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_event_encoding() {
    let event = AnalyticsEvent::Installed {
      version: "v3".to_string(),
    };
    assert_eq!(
      serde_json::to_string(&event).unwrap(),
      r#"{"event":"installed","version":"v3"}"#
    );
  }

  #[test]
  fn test_emit_without_runtime_is_a_no_op() {
    let analytics = Analytics::new(Some(Url::parse("http://127.0.0.1:9/count").unwrap()));
    assert!(analytics.is_enabled());
    analytics.emit(AnalyticsEvent::Activated {
      version: "v3".to_string(),
    });
  }

  #[tokio::test]
  async fn test_emit_inside_runtime_does_not_wait_for_delivery() {
    let analytics = Analytics::new(Some(Url::parse("http://127.0.0.1:9/").unwrap()));

    let started = std::time::Instant::now();
    for _ in 0..10 {
      analytics.emit(AnalyticsEvent::Installed {
        version: "v4".to_string(),
      });
    }
    assert!(started.elapsed() < std::time::Duration::from_millis(200));

    // Let the detached posts run into the closed port
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
  }

  #[tokio::test]
  async fn test_disabled_emit_is_a_no_op() {
    let analytics = Analytics::disabled();
    assert!(!analytics.is_enabled());
    analytics.emit(AnalyticsEvent::Activated {
      version: "v4".to_string(),
    });
  }
}

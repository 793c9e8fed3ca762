//! Inbound push payloads and notification clicks.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientId, Clients};
use crate::config::PushConfig;

/// Wire shape of a push payload. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  tag: Option<String>,
  url: Option<String>,
}

/// What gets displayed for one push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationDescriptor {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Dedup tag: a new notification with the same tag replaces the old one
  pub tag: String,
  /// Click target, relative to the origin or absolute
  pub url: String,
  pub vibrate: Vec<u32>,
  pub require_interaction: bool,
}

impl NotificationDescriptor {
  /// The notification shown when a payload is missing or unreadable.
  pub fn fallback(defaults: &PushConfig) -> Self {
    Self {
      title: defaults.title.clone(),
      body: defaults.body.clone(),
      icon: defaults.icon.clone(),
      badge: defaults.badge.clone(),
      tag: defaults.tag.clone(),
      url: "/".to_string(),
      vibrate: defaults.vibrate.clone(),
      require_interaction: defaults.require_interaction,
    }
  }

  /// Decode a payload, falling back to the default descriptor instead of
  /// failing so the user always sees something.
  pub fn from_payload(payload: Option<&[u8]>, defaults: &PushConfig) -> Self {
    let raw = match payload {
      Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
      _ => {
        debug!("Push event without payload, using default notification");
        return Self::fallback(defaults);
      }
    };

    let payload: PushPayload = match serde_json::from_slice(raw) {
      Ok(payload) => payload,
      Err(e) => {
        warn!("Unreadable push payload, using default notification: {}", e);
        return Self::fallback(defaults);
      }
    };

    let fallback = Self::fallback(defaults);
    Self {
      title: payload.title.unwrap_or(fallback.title),
      body: payload.body.unwrap_or(fallback.body),
      icon: payload.icon.unwrap_or(fallback.icon),
      badge: payload.badge.unwrap_or(fallback.badge),
      tag: payload.tag.unwrap_or(fallback.tag),
      url: payload.url.unwrap_or(fallback.url),
      vibrate: fallback.vibrate,
      require_interaction: fallback.require_interaction,
    }
  }
}

/// Platform notification display.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &NotificationDescriptor) -> Result<()>;

  fn close(&self, tag: &str);
}

/// In-process notifier holding at most one notification per tag.
#[derive(Default)]
pub struct NotificationTray {
  shown: Mutex<Vec<NotificationDescriptor>>,
}

impl NotificationTray {
  pub fn new() -> Self {
    Self::default()
  }

  #[cfg(test)]
  pub fn visible(&self) -> Vec<NotificationDescriptor> {
    self
      .shown
      .lock()
      .map(|shown| shown.clone())
      .unwrap_or_default()
  }
}

impl Notifier for NotificationTray {
  fn show(&self, notification: &NotificationDescriptor) -> Result<()> {
    let mut shown = self.shown.lock().unwrap_or_else(|e| e.into_inner());
    shown.retain(|n| n.tag != notification.tag);
    shown.push(notification.clone());
    info!("Notification [{}] {}", notification.tag, notification.title);
    Ok(())
  }

  fn close(&self, tag: &str) {
    let mut shown = self.shown.lock().unwrap_or_else(|e| e.into_inner());
    shown.retain(|n| n.tag != tag);
  }
}

/// What a notification click ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  Focused(ClientId),
  Opened(ClientId),
  /// Opening a window failed; not retried
  Failed,
}

pub struct PushAdapter<T: Notifier, C: Clients> {
  notifier: Arc<T>,
  clients: Arc<C>,
  origin: Url,
  defaults: PushConfig,
}

impl<T: Notifier, C: Clients> PushAdapter<T, C> {
  pub fn new(notifier: Arc<T>, clients: Arc<C>, origin: Url, defaults: PushConfig) -> Self {
    Self {
      notifier,
      clients,
      origin,
      defaults,
    }
  }

  /// Decode and display a push payload.
  pub fn on_push(&self, payload: Option<&[u8]>) -> NotificationDescriptor {
    let notification = NotificationDescriptor::from_payload(payload, &self.defaults);
    if let Err(e) = self.notifier.show(&notification) {
      warn!("Failed to show notification {}: {:#}", notification.tag, e);
    }
    notification
  }

  /// Close the notification, then focus a window already at the click
  /// target or open a new one there.
  pub fn on_click(&self, notification: &NotificationDescriptor) -> ClickOutcome {
    self.notifier.close(&notification.tag);
    let target = self.click_target(&notification.url);

    let existing = self
      .clients
      .windows()
      .into_iter()
      .find(|w| Url::parse(&w.url).is_ok_and(|u| u == target));

    if let Some(window) = existing {
      match self.clients.focus(window.id) {
        Ok(()) => return ClickOutcome::Focused(window.id),
        Err(e) => debug!("Could not focus window {}: {:#}, opening a new one", window.id, e),
      }
    }

    match self.clients.open_window(target.as_str()) {
      Ok(id) => ClickOutcome::Opened(id),
      Err(e) => {
        warn!("Failed to open window at {}: {:#}", target, e);
        ClickOutcome::Failed
      }
    }
  }

  /// Resolve a click target against the origin; anything unusable means `/`.
  fn click_target(&self, url: &str) -> Url {
    let url = if url.trim().is_empty() { "/" } else { url };
    self
      .origin
      .join(url)
      .or_else(|_| self.origin.join("/"))
      .unwrap_or_else(|_| self.origin.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clients::LocalClients;
  use crate::testing::ORIGIN;

  fn adapter() -> (
    Arc<NotificationTray>,
    Arc<LocalClients>,
    PushAdapter<NotificationTray, LocalClients>,
  ) {
    let tray = Arc::new(NotificationTray::new());
    let clients = Arc::new(LocalClients::new());
    let adapter = PushAdapter::new(
      Arc::clone(&tray),
      Arc::clone(&clients),
      Url::parse(ORIGIN).unwrap(),
      PushConfig::default(),
    );
    (tray, clients, adapter)
  }

  #[test]
  fn test_payload_fields_override_defaults() {
    let defaults = PushConfig::default();
    let n = NotificationDescriptor::from_payload(
      Some(br#"{"title":"X","body":"Y","url":"/z"}"#),
      &defaults,
    );

    assert_eq!(n.title, "X");
    assert_eq!(n.body, "Y");
    assert_eq!(n.url, "/z");
    assert_eq!(n.icon, defaults.icon);
    assert_eq!(n.badge, defaults.badge);
    assert_eq!(n.vibrate, defaults.vibrate);
    assert!(!n.require_interaction);
  }

  #[test]
  fn test_empty_and_malformed_payloads_use_default() {
    let defaults = PushConfig::default();
    let expected = NotificationDescriptor::fallback(&defaults);
    assert_eq!(expected.url, "/");

    for payload in [None, Some(&b""[..]), Some(&b"  \n"[..]), Some(&b"{not json"[..]), Some(&b"[1,2]"[..])] {
      assert_eq!(NotificationDescriptor::from_payload(payload, &defaults), expected);
    }
  }

  #[test]
  fn test_same_tag_replaces_notification() {
    let (tray, _, adapter) = adapter();
    adapter.on_push(Some(br#"{"title":"first","tag":"news"}"#));
    adapter.on_push(Some(br#"{"title":"second","tag":"news"}"#));
    adapter.on_push(Some(br#"{"title":"other","tag":"alerts"}"#));

    let visible = tray.visible();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().any(|n| n.title == "second"));
    assert!(!visible.iter().any(|n| n.title == "first"));
  }

  #[test]
  fn test_click_focuses_existing_window() {
    let (tray, clients, adapter) = adapter();
    clients.attach("https://app.example.com/", None);
    let news = clients.attach("https://app.example.com/news", None);

    let n = adapter.on_push(Some(br#"{"url":"/news"}"#));
    assert_eq!(adapter.on_click(&n), ClickOutcome::Focused(news));
    assert!(tray.visible().is_empty());
    assert_eq!(clients.windows().len(), 2);
  }

  #[test]
  fn test_click_opens_window_when_none_matches() {
    let (_, clients, adapter) = adapter();
    clients.attach("https://app.example.com/", None);

    let n = adapter.on_push(Some(br#"{"url":"/results?day=3"}"#));
    let ClickOutcome::Opened(id) = adapter.on_click(&n) else {
      panic!("expected a new window");
    };

    let opened = clients.windows().into_iter().find(|w| w.id == id).unwrap();
    assert_eq!(opened.url, "https://app.example.com/results?day=3");
    assert!(opened.focused);
  }

  #[test]
  fn test_click_without_target_goes_to_root() {
    let (_, clients, adapter) = adapter();
    let root = clients.attach("https://app.example.com/", None);

    let n = adapter.on_push(None);
    assert_eq!(adapter.on_click(&n), ClickOutcome::Focused(root));

    let mut blank = n.clone();
    blank.url = String::new();
    assert_eq!(adapter.on_click(&blank), ClickOutcome::Focused(root));
  }
}

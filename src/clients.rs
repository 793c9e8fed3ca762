//! Client windows controlled by the interception agent.

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::lifecycle::AgentId;

pub type ClientId = u64;

/// An open client window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: ClientId,
  pub url: String,
  pub focused: bool,
  /// Agent currently intercepting this window's requests
  pub controller: Option<AgentId>,
}

/// Outbound message posted to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// A new generation became current; the UI may prompt for a reload
  VersionUpdated { version: String },
}

/// The set of windows the agent can see.
pub trait Clients: Send + Sync {
  fn windows(&self) -> Vec<ClientWindow>;

  fn focus(&self, id: ClientId) -> Result<()>;

  fn open_window(&self, url: &str) -> Result<ClientId>;

  /// Make `agent` the controller of every open window.
  fn claim(&self, agent: AgentId);

  /// Fire-and-forget delivery of a message.
  fn post(&self, id: ClientId, message: &ClientMessage);
}

#[derive(Default)]
struct ClientState {
  windows: Vec<ClientWindow>,
  inboxes: HashMap<ClientId, Vec<ClientMessage>>,
  next_id: ClientId,
}

/// In-process window set.
#[derive(Default)]
pub struct LocalClients {
  state: Mutex<ClientState>,
}

impl LocalClients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a window that is already open, controlled by `controller`.
  pub fn attach(&self, url: &str, controller: Option<AgentId>) -> ClientId {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.next_id += 1;
    let id = state.next_id;
    state.windows.push(ClientWindow {
      id,
      url: url.to_string(),
      focused: false,
      controller,
    });
    id
  }

  #[cfg(test)]
  pub fn close(&self, id: ClientId) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.windows.retain(|w| w.id != id);
    state.inboxes.remove(&id);
  }

  /// Messages delivered to a window so far.
  #[cfg(test)]
  pub fn messages(&self, id: ClientId) -> Vec<ClientMessage> {
    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.inboxes.get(&id).cloned().unwrap_or_default()
  }
}

impl Clients for LocalClients {
  fn windows(&self) -> Vec<ClientWindow> {
    let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    state.windows.clone()
  }

  fn focus(&self, id: ClientId) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if !state.windows.iter().any(|w| w.id == id) {
      return Err(eyre!("No client window with id {}", id));
    }
    for window in state.windows.iter_mut() {
      window.focused = window.id == id;
    }
    Ok(())
  }

  fn open_window(&self, url: &str) -> Result<ClientId> {
    let id = self.attach(url, None);
    self.focus(id)?;
    debug!("Opened client window {} at {}", id, url);
    Ok(id)
  }

  fn claim(&self, agent: AgentId) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    for window in state.windows.iter_mut() {
      window.controller = Some(agent);
    }
  }

  fn post(&self, id: ClientId, message: &ClientMessage) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if state.windows.iter().any(|w| w.id == id) {
      state.inboxes.entry(id).or_default().push(message.clone());
    }
  }
}

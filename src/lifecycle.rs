//! Lifecycle of the interception agent.
//!
//! Each install creates a new agent. Agents move through
//! `Installing -> Waiting -> Active -> Redundant`; a failed install goes
//! straight to `Redundant`. Activation is the only point where stale
//! generations are reaped, and it is driven by explicit triggers so the whole
//! machine can run without a real runtime behind it.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::{Analytics, AnalyticsEvent};
use crate::cache::{CacheStorage, GenerationManager, GenerationTag};
use crate::clients::{ClientMessage, Clients};
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::net::Network;

pub type AgentId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Installing,
  /// Installed, waiting for the previous agent's clients to let go
  Waiting,
  Active,
  Redundant,
}

impl AgentState {
  pub fn can_become(self, next: AgentState) -> bool {
    use AgentState::*;
    matches!(
      (self, next),
      (Installing, Waiting) | (Installing, Redundant) | (Waiting, Active) | (Waiting, Redundant)
        | (Active, Redundant)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
  pub id: AgentId,
  pub tag: GenerationTag,
  pub state: AgentState,
}

/// Inbound control signal from a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
}

impl ControlMessage {
  pub fn parse(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Unrecognized control message {}: {}", raw, e))
  }
}

pub struct LifecycleController<S: CacheStorage, N: Network, C: Clients> {
  generations: GenerationManager<S, N>,
  clients: Arc<C>,
  analytics: Analytics,
  options: LifecycleConfig,
  agents: Vec<Agent>,
  active: Option<AgentId>,
  waiting: Option<AgentId>,
  next_id: AgentId,
}

impl<S: CacheStorage, N: Network, C: Clients> LifecycleController<S, N, C> {
  pub fn new(generations: GenerationManager<S, N>, clients: Arc<C>, options: LifecycleConfig) -> Self {
    Self {
      generations,
      clients,
      analytics: Analytics::disabled(),
      options,
      agents: Vec::new(),
      active: None,
      waiting: None,
      next_id: 0,
    }
  }

  pub fn with_analytics(mut self, analytics: Analytics) -> Self {
    self.analytics = analytics;
    self
  }

  /// Pick up the generations a previous run left current and waiting.
  /// Returns the active agent.
  pub fn resume(&mut self) -> Result<Option<AgentId>> {
    if self.active.is_none() {
      if let Some(tag) = self.generations.current_tag()? {
        let id = self.register(tag.clone(), AgentState::Active);
        self.active = Some(id);
        info!("Resumed generation {} as agent {}", tag, id);
      }
    }

    if self.waiting.is_none() {
      if let Some(tag) = self.generations.waiting_tag()? {
        if self.current_tag() != Some(&tag) {
          let id = self.register(tag.clone(), AgentState::Waiting);
          self.waiting = Some(id);
          info!("Resumed waiting generation {} as agent {}", tag, id);
        }
      }
    }

    Ok(self.active)
  }

  pub fn state_of(&self, id: AgentId) -> Option<AgentState> {
    self.agent(id).map(|a| a.state)
  }

  pub fn active(&self) -> Option<&Agent> {
    self.active.and_then(|id| self.agent(id))
  }

  pub fn waiting(&self) -> Option<&Agent> {
    self.waiting.and_then(|id| self.agent(id))
  }

  /// Generation the strategies should read and write.
  pub fn current_tag(&self) -> Option<&GenerationTag> {
    self.active().map(|a| &a.tag)
  }

  /// Install a new generation.
  ///
  /// On success the new agent waits. It activates at once when forced
  /// takeover is configured or when no open client is held by the current
  /// agent. On failure the agent is discarded and nothing else changes.
  pub async fn install(
    &mut self,
    tag: GenerationTag,
    seeds: &[String],
  ) -> Result<AgentId, LifecycleError> {
    let id = self.register(tag.clone(), AgentState::Installing);

    if let Err(e) = self.generations.begin_install(&tag, seeds).await {
      self.transition(id, AgentState::Redundant);
      return Err(e.into());
    }

    self.transition(id, AgentState::Waiting);
    if let Some(superseded) = self.waiting.replace(id) {
      self.transition(superseded, AgentState::Redundant);
    }
    if let Err(e) = self.generations.mark_waiting(&tag) {
      warn!("Could not persist waiting generation {}: {:#}", tag, e);
    }
    self.analytics.emit(AnalyticsEvent::Installed {
      version: tag.to_string(),
    });

    if self.options.skip_waiting || !self.active_holds_clients() {
      self.activate_waiting()?;
    }

    Ok(id)
  }

  /// Forced takeover: activate the waiting agent now.
  pub fn skip_waiting(&mut self) -> Result<(), LifecycleError> {
    if self.waiting.is_none() {
      return Err(LifecycleError::NothingWaiting);
    }
    self.activate_waiting()
  }

  /// Normal activation trigger. Activates the waiting agent once no client is
  /// held by the current one; returns whether it did.
  pub fn clients_released(&mut self) -> Result<bool, LifecycleError> {
    if self.waiting.is_none() || self.active_holds_clients() {
      return Ok(false);
    }
    self.activate_waiting()?;
    Ok(true)
  }

  /// Take control of every open client without waiting for a navigation.
  pub fn claim(&self) -> Result<(), LifecycleError> {
    let id = self.active.ok_or(LifecycleError::NothingActive)?;
    self.clients.claim(id);
    Ok(())
  }

  pub fn handle_message(&mut self, message: ControlMessage) -> Result<(), LifecycleError> {
    match message {
      ControlMessage::SkipWaiting => self.skip_waiting(),
    }
  }

  fn activate_waiting(&mut self) -> Result<(), LifecycleError> {
    let id = self.waiting.take().ok_or(LifecycleError::NothingWaiting)?;
    let Some(tag) = self.agent(id).map(|a| a.tag.clone()) else {
      return Err(LifecycleError::NothingWaiting);
    };

    if let Err(e) = self.generations.activate(&tag) {
      self.waiting = Some(id);
      return Err(LifecycleError::Activation {
        tag: tag.to_string(),
        reason: format!("{:#}", e),
      });
    }

    if let Some(previous) = self.active.replace(id) {
      self.transition(previous, AgentState::Redundant);
    }
    self.transition(id, AgentState::Active);

    if self.options.claim_clients {
      self.clients.claim(id);
    }
    self.broadcast_version(&tag);
    self.analytics.emit(AnalyticsEvent::Activated {
      version: tag.to_string(),
    });

    Ok(())
  }

  /// Tell every open client about the new generation. Nothing waits on delivery.
  fn broadcast_version(&self, tag: &GenerationTag) {
    let message = ClientMessage::VersionUpdated {
      version: tag.to_string(),
    };
    for window in self.clients.windows() {
      self.clients.post(window.id, &message);
    }
  }

  fn active_holds_clients(&self) -> bool {
    self.active.is_some_and(|active| {
      self
        .clients
        .windows()
        .iter()
        .any(|w| w.controller == Some(active))
    })
  }

  fn register(&mut self, tag: GenerationTag, state: AgentState) -> AgentId {
    self.next_id += 1;
    let id = self.next_id;
    info!("Agent {} for generation {} is {:?}", id, tag, state);
    self.agents.push(Agent { id, tag, state });
    id
  }

  fn transition(&mut self, id: AgentId, next: AgentState) {
    let Some(agent) = self.agents.iter_mut().find(|a| a.id == id) else {
      return;
    };
    if !agent.state.can_become(next) {
      warn!(
        "Ignoring transition of agent {} from {:?} to {:?}",
        id, agent.state, next
      );
      return;
    }
    info!(
      "Agent {} ({}): {:?} -> {:?}",
      id, agent.tag, agent.state, next
    );
    agent.state = next;
  }

  fn agent(&self, id: AgentId) -> Option<&Agent> {
    self.agents.iter().find(|a| a.id == id)
  }
}

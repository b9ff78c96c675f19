//! Weighted-random humanization planner.
//!
//! The host agent asks [`HumanizationEngine::plan`] between real actions.
//! The chance of injecting something scales with the emergency state: the
//! more suspicious the engine is, the more often idle/emote/variance actions
//! are mixed in. A locked engine plans nothing.

use std::time::Duration;

use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, HumanizationPolicy};
use crate::emergency::EmergencyState;

/// An action the host should perform to break up regularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanizedAction {
    pub name: String,
    pub delay: Duration,
}

/// Pacing advice for the host in the current emergency state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pacing {
    pub state: EmergencyState,
    /// Multiply the host's normal inter-action delay by this.
    pub delay_multiplier: f64,
    pub humanization_probability: f64,
    /// `false` while locked: `record()` rejects every action.
    pub accepting_actions: bool,
}

impl Pacing {
    pub fn delay_multiplier(state: EmergencyState) -> f64 {
        match state {
            EmergencyState::Normal | EmergencyState::Locked => 1.0,
            EmergencyState::Suspicious => 1.5,
            EmergencyState::Critical => 2.5,
        }
    }
}

/// Planner for humanization actions.
pub struct HumanizationEngine {
    policy: HumanizationPolicy,
    index: Option<WeightedIndex<f64>>,
    rng: StdRng,
}

impl HumanizationEngine {
    pub fn new(policy: HumanizationPolicy) -> Result<Self, ConfigError> {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Create a planner with a fixed seed (for testing).
    pub fn with_seed(policy: HumanizationPolicy, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: HumanizationPolicy, rng: StdRng) -> Result<Self, ConfigError> {
        // weights are only checked when humanization is on
        let index = if !policy.enabled || policy.actions.is_empty() {
            None
        } else {
            Some(
                WeightedIndex::new(policy.actions.iter().map(|a| a.weight))
                    .map_err(|e| ConfigError::Validation(format!("humanization weights: {}", e)))?,
            )
        };
        Ok(Self { policy, index, rng })
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled && self.index.is_some()
    }

    /// Multiplier applied to the base injection probability.
    pub fn frequency_factor(state: EmergencyState) -> f64 {
        match state {
            EmergencyState::Normal => 1.0,
            EmergencyState::Suspicious => 2.0,
            EmergencyState::Critical => 3.0,
            EmergencyState::Locked => 0.0,
        }
    }

    /// Probability of injecting an action between two real ones in `state`.
    pub fn probability(&self, state: EmergencyState) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        (self.policy.base_probability * Self::frequency_factor(state)).min(1.0)
    }

    pub fn pacing(&self, state: EmergencyState) -> Pacing {
        Pacing {
            state,
            delay_multiplier: Pacing::delay_multiplier(state),
            humanization_probability: self.probability(state),
            accepting_actions: state != EmergencyState::Locked,
        }
    }

    /// Pick one action by weight, regardless of state.
    pub fn select(&mut self) -> Option<HumanizedAction> {
        let index = self.index.as_ref()?;
        let action = &self.policy.actions[index.sample(&mut self.rng)];
        let delay_ms = if action.max_delay_ms > action.min_delay_ms {
            self.rng.gen_range(action.min_delay_ms..=action.max_delay_ms)
        } else {
            action.min_delay_ms
        };
        Some(HumanizedAction {
            name: action.name.clone(),
            delay: Duration::from_millis(delay_ms),
        })
    }

    /// Decide whether to inject an action now and which one.
    pub fn plan(&mut self, state: EmergencyState) -> Option<HumanizedAction> {
        let p = self.probability(state);
        if p <= 0.0 || !self.rng.gen_bool(p) {
            return None;
        }
        self.select()
    }
}

impl std::fmt::Debug for HumanizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanizationEngine")
            .field("enabled", &self.policy.enabled)
            .field("base_probability", &self.policy.base_probability)
            .field("actions", &self.policy.actions.len())
            .finish()
    }
}

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::CustomStrategy;

use super::state::StrategyDefinition;

/// Prefix of the result slots the engine reads custom strategy outcomes from.
pub(crate) const SLOT_PREFIX: &str = "customStrategy";

/// One custom strategy evaluation scheduled for a feature.
#[derive(Clone)]
pub(crate) struct PlannedStrategy {
    pub slot: String,
    /// `None` when no implementation is registered under the declared name.
    pub implementation: Option<Arc<dyn CustomStrategy>>,
    pub definition: StrategyDefinition,
}

/// Per-feature evaluation plan built from the last loaded state.
///
/// Never mutated once published. Updates build a new plan and swap it in.
#[derive(Clone, Default)]
pub(crate) struct StrategyPlan {
    features: HashMap<String, Arc<[PlannedStrategy]>>,
}

impl StrategyPlan {
    pub(crate) fn get(&self, feature_name: &str) -> Option<&[PlannedStrategy]> {
        self.features.get(feature_name).map(|planned| &planned[..])
    }

    /// Schedule `planned` for `feature_name`. A feature with nothing to run is left out.
    pub(crate) fn insert(&mut self, feature_name: String, planned: Vec<PlannedStrategy>) {
        if planned.is_empty() {
            self.features.remove(&feature_name);
        } else {
            self.features.insert(feature_name, planned.into());
        }
    }

    pub(crate) fn remove(&mut self, feature_name: &str) {
        self.features.remove(feature_name);
    }

    pub(crate) fn len(&self) -> usize {
        self.features.len()
    }
}

/// `PlanStore` provides Sync storage for the current [`StrategyPlan`] that allows concurrent
/// access for readers and writers. Readers get a snapshot and never observe a partially built plan.
pub(crate) struct PlanStore {
    plan: RwLock<Arc<StrategyPlan>>,
}

impl PlanStore {
    pub(crate) fn new() -> Self {
        Self {
            plan: RwLock::new(Arc::new(StrategyPlan::default())),
        }
    }

    pub(crate) fn get(&self) -> Arc<StrategyPlan> {
        // A writer can only panic between taking the lock and swapping an already built Arc, so a
        // poisoned value is still a complete plan.
        self.plan
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a new plan, returning the previous one.
    pub(crate) fn set(&self, plan: StrategyPlan) -> Arc<StrategyPlan> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Arc::new(plan);

        let mut slot = self.plan.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut slot, new_value)
    }
}

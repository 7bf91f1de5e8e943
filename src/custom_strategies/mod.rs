//! Host-side evaluation of strategies the engine cannot evaluate itself.
//!
//! Every state load builds a plan: for each feature, the ordered list of custom strategies to run
//! and the result slot (`customStrategy1`, `customStrategy2`, ...) each one fills. Evaluating a
//! toggle runs its plan and hands the slot results to the engine alongside the request.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{Context, CustomStrategy};

mod plan;
mod state;

pub use state::StrategyDefinition;

use plan::{PlanStore, PlannedStrategy, StrategyPlan, SLOT_PREFIX};
use state::{parse_state, DeltaEvent, FeatureDefinition, StateUpdate};

/// Slot name to outcome, as sent to the engine. Ordered so requests encode deterministically.
pub type CustomStrategyResults = BTreeMap<String, bool>;

/// Outcome of one planned strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The implementation ran and returned this value.
    Evaluated(bool),
    /// No implementation is registered under the declared name.
    Unregistered,
    /// The implementation panicked.
    Faulted,
}

impl SlotOutcome {
    /// The value sent to the engine: only an implementation that ran can grant access.
    pub fn is_enabled(self) -> bool {
        matches!(self, SlotOutcome::Evaluated(true))
    }
}

/// Registry of custom strategies plus the plan built from the last loaded state.
pub struct CustomStrategiesEvaluator {
    registered: HashMap<String, Arc<dyn CustomStrategy>>,
    fallback: Option<Arc<dyn CustomStrategy>>,
    built_in: HashSet<String>,
    plan: PlanStore,
}

impl CustomStrategiesEvaluator {
    /// Create an evaluator.
    ///
    /// When two strategies share a name, the first one wins. Strategies named in `built_in` are
    /// evaluated by the engine and never planned here.
    pub fn new(
        strategies: impl IntoIterator<Item = Arc<dyn CustomStrategy>>,
        fallback: Option<Arc<dyn CustomStrategy>>,
        built_in: impl IntoIterator<Item = String>,
    ) -> CustomStrategiesEvaluator {
        let mut registered = HashMap::new();
        for strategy in strategies {
            let name = strategy.name().to_owned();
            if registered.contains_key(&name) {
                log::warn!(target: "yggdrasil", strategy = name.as_str();
                           "custom strategy registered twice, keeping the first registration");
                continue;
            }
            registered.insert(name, strategy);
        }

        CustomStrategiesEvaluator {
            registered,
            fallback,
            built_in: built_in.into_iter().collect(),
            plan: PlanStore::new(),
        }
    }

    /// Whether this evaluator could ever produce a result.
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.fallback.is_none()
    }

    /// Rebuild the plan from a state payload.
    ///
    /// Never fails. A missing, empty, or unparseable payload, or one without a `features` or
    /// `events` key, leaves the current plan in place. A full state with an empty `features` list
    /// replaces it with an empty plan.
    pub(crate) fn load_strategies_for(&self, state: Option<&str>) {
        if self.is_empty() {
            return;
        }
        let Some(state) = state.filter(|state| !state.trim().is_empty()) else {
            return;
        };

        let update = match parse_state(state) {
            Ok(update) => update,
            Err(err) => {
                log::warn!(target: "yggdrasil",
                           "failed to read strategies from state, keeping the previous plan: {err}");
                return;
            }
        };

        let plan = match update {
            StateUpdate::Full(features) => {
                let mut plan = StrategyPlan::default();
                for feature in features {
                    self.plan_feature(&mut plan, feature);
                }
                plan
            }
            StateUpdate::Delta(events) => {
                let mut plan = StrategyPlan::clone(&self.plan.get());
                for event in events {
                    self.apply_event(&mut plan, event);
                }
                plan
            }
            StateUpdate::Unchanged => return,
        };

        log::debug!(target: "yggdrasil", features = plan.len(); "custom strategy plan updated");
        self.plan.set(plan);
    }

    fn apply_event(&self, plan: &mut StrategyPlan, event: DeltaEvent) {
        match event {
            DeltaEvent::Hydration { features } => {
                *plan = StrategyPlan::default();
                for feature in features.into_iter().filter_map(Option::from) {
                    self.plan_feature(plan, feature);
                }
            }
            DeltaEvent::FeatureUpdated { feature } => {
                if let Some(feature) = Option::from(feature) {
                    self.plan_feature(plan, feature);
                }
            }
            DeltaEvent::FeatureRemoved { feature_name } => plan.remove(&feature_name),
            DeltaEvent::Other => {}
        }
    }

    fn plan_feature(&self, plan: &mut StrategyPlan, feature: FeatureDefinition) {
        let mut planned = Vec::new();

        for definition in feature.strategies {
            if self.built_in.contains(&definition.name) {
                continue;
            }
            let implementation = self.registered.get(&definition.name).cloned();
            if implementation.is_none() {
                log::warn!(target: "yggdrasil", feature = feature.name.as_str(), strategy = definition.name.as_str();
                           "custom strategy is not registered, it will always evaluate to false");
            }
            planned.push(PlannedStrategy {
                slot: format!("{SLOT_PREFIX}{}", planned.len() + 1),
                implementation,
                definition,
            });
        }

        if let Some(fallback) = &self.fallback {
            planned.push(PlannedStrategy {
                slot: format!("{SLOT_PREFIX}{}", planned.len() + 1),
                implementation: Some(fallback.clone()),
                definition: StrategyDefinition::fallback(),
            });
        }

        plan.insert(feature.name, planned);
    }

    /// Run the plan for `toggle_name`. A toggle without planned strategies yields an empty map.
    pub fn evaluate(&self, toggle_name: &str, context: &Context) -> CustomStrategyResults {
        self.evaluate_detailed(toggle_name, context)
            .into_iter()
            .map(|(slot, outcome)| (slot, outcome.is_enabled()))
            .collect()
    }

    /// Like [`CustomStrategiesEvaluator::evaluate`], but keeps why each slot got its value.
    pub fn evaluate_detailed(
        &self,
        toggle_name: &str,
        context: &Context,
    ) -> BTreeMap<String, SlotOutcome> {
        let plan = self.plan.get();
        let Some(planned) = plan.get(toggle_name) else {
            return BTreeMap::new();
        };

        planned
            .iter()
            .map(|strategy| (strategy.slot.clone(), run(strategy, context)))
            .collect()
    }
}

fn run(strategy: &PlannedStrategy, context: &Context) -> SlotOutcome {
    let Some(implementation) = &strategy.implementation else {
        return SlotOutcome::Unregistered;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| {
        implementation.is_enabled(&strategy.definition.parameters, context)
    })) {
        Ok(enabled) => SlotOutcome::Evaluated(enabled),
        Err(_) => {
            log::warn!(target: "yggdrasil", strategy = strategy.definition.name.as_str(), slot = strategy.slot.as_str();
                       "custom strategy panicked, treating it as disabled");
            SlotOutcome::Faulted
        }
    }
}

use std::collections::HashMap;

use crate::Context;

/// A host-side activation strategy the engine does not know how to evaluate itself.
///
/// Implementations are called concurrently from any thread evaluating a toggle, so they should be
/// cheap and must not call back into the engine.
pub trait CustomStrategy: Send + Sync {
    /// Strategy name as it appears in toggle definitions.
    fn name(&self) -> &str;

    /// Decide whether this strategy is satisfied for `context`.
    ///
    /// `parameters` are the strategy parameters from the toggle definition. A panic is treated as
    /// `false` for this strategy only.
    fn is_enabled(&self, parameters: &HashMap<String, String>, context: &Context) -> bool;
}

/// A [`CustomStrategy`] backed by a closure.
pub struct FnStrategy<F> {
    name: String,
    is_enabled: F,
}

impl<F> CustomStrategy for FnStrategy<F>
where
    F: Fn(&HashMap<String, String>, &Context) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self, parameters: &HashMap<String, String>, context: &Context) -> bool {
        (self.is_enabled)(parameters, context)
    }
}

/// Build a named strategy out of a closure.
///
/// ```
/// # use yggdrasil_bridge::strategy_fn;
/// let strategy = strategy_fn("tenant", |parameters, context| {
///     parameters.get("tenant") == context.properties.get("tenant")
/// });
/// ```
pub fn strategy_fn<F>(name: impl Into<String>, is_enabled: F) -> FnStrategy<F>
where
    F: Fn(&HashMap<String, String>, &Context) -> bool + Send + Sync,
{
    FnStrategy {
        name: name.into(),
        is_enabled,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::Context;

    use super::{strategy_fn, CustomStrategy};

    #[test]
    fn closure_strategy_sees_parameters_and_context() {
        let strategy = strategy_fn("region", |parameters, context| {
            parameters.get("region").map(String::as_str) == context.environment.as_deref()
        });
        let parameters = HashMap::from([("region".to_owned(), "eu".to_owned())]);

        assert_eq!(strategy.name(), "region");
        assert!(strategy.is_enabled(&parameters, &Context::new().with_environment("eu")));
        assert!(!strategy.is_enabled(&parameters, &Context::new().with_environment("us")));
    }
}

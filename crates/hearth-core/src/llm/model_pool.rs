use std::collections::HashMap;

#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;

pub const DEFAULT_TIER: &str = "default";
pub const DECISION_TIER: &str = "decision";

/// Pool of named model tiers ("default" writes replies, "decision" picks tools).
///
/// Unknown tier names fall back to "default".
#[allow(deprecated)]
#[derive(Clone)]
pub struct ModelPool {
    default: (CompletionModelHandle<'static>, String),
    /// (model_handle, model_name_for_logging)
    models: HashMap<String, (CompletionModelHandle<'static>, String)>,
}

#[allow(deprecated)]
impl ModelPool {
    /// Build a pool. Fails when no "default" tier is present.
    pub fn new(
        mut models: HashMap<String, (CompletionModelHandle<'static>, String)>,
    ) -> anyhow::Result<Self> {
        let default = models
            .remove(DEFAULT_TIER)
            .ok_or_else(|| anyhow::anyhow!("model pool needs a \"{DEFAULT_TIER}\" tier"))?;
        Ok(Self { default, models })
    }

    /// Get a specific tier. Falls back to "default" if the tier is not found.
    pub fn get(&self, tier: &str) -> (&CompletionModelHandle<'static>, &str) {
        let (handle, name) = self.models.get(tier).unwrap_or(&self.default);
        (handle, name)
    }
}

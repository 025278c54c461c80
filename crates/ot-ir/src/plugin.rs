//! Plugin instances and effect chain descriptions.
//!
//! A `PluginInstance` is the scheduling-contract view of an effect:
//! parameters, automation lanes, reported latency, and bypass. The
//! runtime builds graph nodes from `EffectKind`; format-specific
//! binary loading lives outside the engine.

use alloc::collections::BTreeMap;
use alloc::string::String;
use serde::{Deserialize, Serialize};

use crate::automation::AutomationCurve;

/// Identifier for a plugin instance. Unique within a project.
pub type PluginId = u32;

/// Identifier for an automatable parameter, unique within a plugin.
pub type ParamId = u32;

/// Built-in effect algorithms the runtime can instantiate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum EffectKind {
    /// Plain gain stage.
    Gain,
    /// Low-pass filter.
    LowPass { cutoff_hz: f32 },
    /// Fixed delay line. Reported as plugin latency.
    Delay { seconds: f32 },
}

/// One effect in a track's chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginInstance {
    pub id: PluginId,
    pub name: String,
    pub kind: EffectKind,
    /// Current parameter values.
    pub parameters: BTreeMap<ParamId, f32>,
    /// Automation lanes, keyed by parameter.
    pub automation: BTreeMap<ParamId, AutomationCurve>,
    /// Processing latency this instance reports, in samples.
    pub latency_samples: u64,
    /// Bypassed instances pass audio through and report zero latency.
    pub bypassed: bool,
}

impl PluginInstance {
    /// Create an instance of the given kind with empty parameter maps.
    pub fn new(id: PluginId, name: &str, kind: EffectKind) -> Self {
        Self {
            id,
            name: String::from(name),
            kind,
            parameters: BTreeMap::new(),
            automation: BTreeMap::new(),
            latency_samples: 0,
            bypassed: false,
        }
    }

    /// Latency contributed to the signal path (zero when bypassed).
    pub fn effective_latency(&self) -> u64 {
        if self.bypassed {
            0
        } else {
            self.latency_samples
        }
    }
}

/// Ordered effect chain description with a chain-level wet/dry split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub plugins: alloc::vec::Vec<PluginInstance>,
    /// Processed-signal gain.
    pub wet: f32,
    /// Unprocessed-signal gain.
    pub dry: f32,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            plugins: alloc::vec::Vec::new(),
            wet: 1.0,
            dry: 0.0,
        }
    }
}

impl ChainSpec {
    /// Total non-bypassed latency across the chain, in samples.
    pub fn total_latency(&self) -> u64 {
        self.plugins.iter().map(|p| p.effective_latency()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypassed_plugin_reports_zero_latency() {
        let mut p = PluginInstance::new(1, "verb", EffectKind::Delay { seconds: 0.1 });
        p.latency_samples = 4410;
        assert_eq!(p.effective_latency(), 4410);
        p.bypassed = true;
        assert_eq!(p.effective_latency(), 0);
    }

    #[test]
    fn chain_latency_sums_active_plugins() {
        let mut chain = ChainSpec::default();
        let mut a = PluginInstance::new(1, "a", EffectKind::Gain);
        a.latency_samples = 100;
        let mut b = PluginInstance::new(2, "b", EffectKind::Gain);
        b.latency_samples = 50;
        b.bypassed = true;
        let mut c = PluginInstance::new(3, "c", EffectKind::Gain);
        c.latency_samples = 25;
        chain.plugins.extend([a, b, c]);
        assert_eq!(chain.total_latency(), 125);
    }
}

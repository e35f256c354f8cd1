//! Model descriptors: tier, quantization, device and memory estimation.
//!
//! Tiers follow the routing architecture:
//! - Tier 1: small classifier-class models, always CPU, unquantized
//! - Tier 2: mid-size reasoning models, 8-bit
//! - Tier 3: domain specialist models, 4-bit

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model size/capability class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Tier1,
    Tier2,
    Tier3,
}

impl ModelTier {
    /// Unquantized memory footprint estimate in MB.
    pub const fn base_memory_mb(self) -> u64 {
        match self {
            Self::Tier1 => 440,
            Self::Tier2 => 5_600,
            Self::Tier3 => 14_000,
        }
    }

    /// Default quantization applied to models of this tier.
    pub const fn default_quantization(self) -> Quantization {
        match self {
            Self::Tier1 => Quantization::None,
            Self::Tier2 => Quantization::Int8,
            Self::Tier3 => Quantization::Int4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
        }
    }
}

/// Weight quantization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    #[default]
    None,
    Fp16,
    Int8,
    Int4,
}

impl Quantization {
    /// Multiplier applied to the tier's base estimate.
    pub const fn memory_factor(self) -> f64 {
        match self {
            Self::None => 1.0,
            Self::Fp16 => 0.5,
            Self::Int8 => 0.33,
            Self::Int4 => 0.25,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fp16 => "fp16",
            Self::Int8 => "int8",
            Self::Int4 => "int4",
        }
    }
}

/// Placement of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
    Metal,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(n) => write!(f, "cuda:{n}"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Estimate the resident memory of a model in MB.
///
/// Monotone in tier; quantization scales the base estimate down. Never
/// returns less than 1.
pub fn estimate_memory_mb(tier: ModelTier, quantization: Quantization) -> u64 {
    let estimate = (tier.base_memory_mb() as f64 * quantization.memory_factor()).ceil() as u64;
    estimate.max(1)
}

/// Everything the registry needs to load a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    pub tier: ModelTier,
    #[serde(default)]
    pub quantization: Quantization,
    #[serde(default)]
    pub device: Device,
}

impl ModelSpec {
    pub fn new(
        model_id: impl Into<String>,
        tier: ModelTier,
        quantization: Quantization,
        device: Device,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            tier,
            quantization,
            device,
        }
    }

    /// Tier preset: default quantization for the tier, CPU placement.
    pub fn for_tier(model_id: impl Into<String>, tier: ModelTier) -> Self {
        Self::new(model_id, tier, tier.default_quantization(), Device::Cpu)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn memory_estimate_mb(&self) -> u64 {
        estimate_memory_mb(self.tier, self.quantization)
    }

    /// Backend-facing model name with any `ollama://` scheme stripped.
    pub fn backend_name(&self) -> &str {
        self.model_id
            .strip_prefix("ollama://")
            .unwrap_or(&self.model_id)
    }
}

/// Opaque reference to a model loaded by a backend.
///
/// The registry owns the resident entry; callers receive clones that
/// identify the same load via `handle_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandle {
    pub handle_id: Uuid,
    pub model_id: String,
    /// Name the backend knows the model by.
    pub backend_name: String,
    pub device: Device,
}

impl ModelHandle {
    pub fn new(spec: &ModelSpec) -> Self {
        Self {
            handle_id: Uuid::new_v4(),
            model_id: spec.model_id.clone(),
            backend_name: spec.backend_name().to_string(),
            device: spec.device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_monotone_in_tier() {
        for quant in [
            Quantization::None,
            Quantization::Fp16,
            Quantization::Int8,
            Quantization::Int4,
        ] {
            let t1 = estimate_memory_mb(ModelTier::Tier1, quant);
            let t2 = estimate_memory_mb(ModelTier::Tier2, quant);
            let t3 = estimate_memory_mb(ModelTier::Tier3, quant);
            assert!(t1 < t2 && t2 < t3, "not monotone for {quant:?}");
        }
    }

    #[test]
    fn test_int4_is_four_times_smaller() {
        let full = estimate_memory_mb(ModelTier::Tier3, Quantization::None);
        let int4 = estimate_memory_mb(ModelTier::Tier3, Quantization::Int4);
        assert_eq!(full, 14_000);
        assert_eq!(int4, 3_500);
    }

    #[test]
    fn test_tier_presets() {
        let tier1 = ModelSpec::for_tier("tinybert", ModelTier::Tier1);
        assert_eq!(tier1.quantization, Quantization::None);
        assert_eq!(tier1.device, Device::Cpu);

        let tier2 = ModelSpec::for_tier("phi-2", ModelTier::Tier2);
        assert_eq!(tier2.quantization, Quantization::Int8);

        let tier3 = ModelSpec::for_tier("llama-2-7b", ModelTier::Tier3);
        assert_eq!(tier3.quantization, Quantization::Int4);
    }

    #[test]
    fn test_backend_name_strips_scheme() {
        let spec = ModelSpec::for_tier("ollama://llama3.2:3b-instruct-q4_0", ModelTier::Tier3);
        assert_eq!(spec.backend_name(), "llama3.2:3b-instruct-q4_0");
        let bare = ModelSpec::for_tier("mistral:7b", ModelTier::Tier3);
        assert_eq!(bare.backend_name(), "mistral:7b");
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
    }
}

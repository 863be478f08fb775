//! Session configuration.

use std::collections::HashMap;
use std::fmt;

use ratecast_core::prelude::{NeuronType, Synapse};
use ratecast_source::prelude::{Activation, LayerId};

use crate::errors::ConvertError;

/// Either side of the activation mapping: a named activation from the source
/// model, or a neuron type of the target network.
#[derive(Debug, Clone, PartialEq)]
pub enum Nonlinearity {
    Activation(Activation),
    Neuron(NeuronType),
}

impl From<Activation> for Nonlinearity {
    fn from(a: Activation) -> Nonlinearity {
        Nonlinearity::Activation(a)
    }
}

impl From<NeuronType> for Nonlinearity {
    fn from(n: NeuronType) -> Nonlinearity {
        Nonlinearity::Neuron(n)
    }
}

impl fmt::Display for Nonlinearity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Nonlinearity::Activation(a) => write!(f, "{}", a.name()),
            Nonlinearity::Neuron(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FiringRateScale {
    #[default]
    None,
    Global(f32),
    PerLayer(HashMap<LayerId, f32>),
}

impl FiringRateScale {
    pub fn for_layer(&self, layer: LayerId) -> Option<f32> {
        match self {
            FiringRateScale::None => None,
            FiringRateScale::Global(k) => Some(*k),
            FiringRateScale::PerLayer(map) => map.get(&layer).copied(),
        }
    }

    fn factors(&self) -> Vec<f32> {
        match self {
            FiringRateScale::None => vec![],
            FiringRateScale::Global(k) => vec![*k],
            FiringRateScale::PerLayer(map) => map.values().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConverterConfig {
    /// Wrap layers without a native mapping in tensor nodes instead of failing.
    pub allow_fallback: bool,
    /// The converted network is only run, never trained.
    pub inference_only: bool,
    /// Convert max pooling as average pooling.
    pub max_to_avg_pool: bool,
    /// Give each application of a weighted layer its own copy of the weights.
    pub split_shared_weights: bool,
    /// Replacements applied before and after mapping activations to neuron types.
    pub swap_activations: Vec<(Nonlinearity, Nonlinearity)>,
    pub scale_firing_rates: FiringRateScale,
    /// Applied to connections and probes leaving neurons.
    pub synapse: Option<Synapse>,
}

impl Default for ConverterConfig {
    fn default() -> ConverterConfig {
        ConverterConfig {
            allow_fallback: true,
            inference_only: false,
            max_to_avg_pool: false,
            split_shared_weights: false,
            swap_activations: vec![],
            scale_firing_rates: FiringRateScale::None,
            synapse: None,
        }
    }
}

impl ConverterConfig {
    pub fn with_allow_fallback(self, allow_fallback: bool) -> ConverterConfig {
        ConverterConfig { allow_fallback, ..self }
    }

    pub fn with_inference_only(self, inference_only: bool) -> ConverterConfig {
        ConverterConfig { inference_only, ..self }
    }

    pub fn with_max_to_avg_pool(self, max_to_avg_pool: bool) -> ConverterConfig {
        ConverterConfig { max_to_avg_pool, ..self }
    }

    pub fn with_split_shared_weights(self, split_shared_weights: bool) -> ConverterConfig {
        ConverterConfig { split_shared_weights, ..self }
    }

    pub fn with_swap(
        mut self,
        from: impl Into<Nonlinearity>,
        to: impl Into<Nonlinearity>,
    ) -> ConverterConfig {
        self.swap_activations.push((from.into(), to.into()));
        self
    }

    pub fn with_scale_firing_rates(self, scale_firing_rates: FiringRateScale) -> ConverterConfig {
        ConverterConfig { scale_firing_rates, ..self }
    }

    pub fn with_synapse(self, synapse: Option<Synapse>) -> ConverterConfig {
        ConverterConfig { synapse, ..self }
    }

    pub fn swap(&self, nonlinearity: Nonlinearity) -> Nonlinearity {
        self.swap_activations
            .iter()
            .find(|(from, _)| *from == nonlinearity)
            .map(|(_, to)| to.clone())
            .unwrap_or(nonlinearity)
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        for k in self.scale_firing_rates.factors() {
            if !(k.is_finite() && k > 0.0) {
                let msg = format!("firing rate scale must be positive, got {k}");
                return Err(ConvertError::InvalidConfig(msg));
            }
        }
        if let Some(s) = &self.synapse {
            s.validate().map_err(|e| ConvertError::InvalidConfig(e.to_string()))?;
        }
        for (ix, (from, _)) in self.swap_activations.iter().enumerate() {
            if self.swap_activations[..ix].iter().any(|(other, _)| other == from) {
                let msg = format!("{from} is swapped more than once");
                return Err(ConvertError::InvalidConfig(msg));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn swaps_apply_once() {
        let config = ConverterConfig::default()
            .with_swap(Activation::Relu, NeuronType::spiking_relu())
            .with_swap(NeuronType::relu(), NeuronType::lif());
        assert_eq!(config.swap(Activation::Relu.into()), NeuronType::spiking_relu().into());
        assert_eq!(config.swap(NeuronType::relu().into()), NeuronType::lif().into());
        assert_eq!(config.swap(Activation::Tanh.into()), Activation::Tanh.into());
    }

    #[test]
    fn validation() {
        assert!(ConverterConfig::default().validate().is_ok());
        let bad = ConverterConfig::default().with_scale_firing_rates(FiringRateScale::Global(0.0));
        assert!(matches!(bad.validate(), Err(ConvertError::InvalidConfig(_))));
        let scales = hashmap! { LayerId(0) => 2.0, LayerId(1) => -1.0 };
        let bad = ConverterConfig::default()
            .with_scale_firing_rates(FiringRateScale::PerLayer(scales));
        assert!(bad.validate().is_err());
        let bad = ConverterConfig::default().with_synapse(Some(Synapse::lowpass(-0.1)));
        assert!(bad.validate().is_err());
        let bad = ConverterConfig::default()
            .with_swap(Activation::Relu, Activation::Linear)
            .with_swap(Activation::Relu, Activation::Tanh);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn per_layer_scale() {
        let scale = FiringRateScale::PerLayer(hashmap! { LayerId(3) => 10.0 });
        assert_eq!(scale.for_layer(LayerId(3)), Some(10.0));
        assert_eq!(scale.for_layer(LayerId(4)), None);
    }
}

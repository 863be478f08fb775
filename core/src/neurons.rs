use std::fmt;

use ndarray::{ArrayD, ArrayViewD};

/// Neuron models available to ensembles.
///
/// Spiking types are evaluated through their rate approximation.
#[derive(Debug, Clone, PartialEq)]
pub enum NeuronType {
    RectifiedLinear { amplitude: f32 },
    SpikingRectifiedLinear { amplitude: f32 },
    LeakyReLU { negative_slope: f32, amplitude: f32 },
    SpikingLeakyReLU { negative_slope: f32, amplitude: f32 },
    Sigmoid { tau_ref: f32 },
    Tanh { tau_ref: f32 },
    LifRate { tau_rc: f32, tau_ref: f32, amplitude: f32 },
    Lif { tau_rc: f32, tau_ref: f32, amplitude: f32 },
}

use NeuronType::*;

impl NeuronType {
    pub fn relu() -> NeuronType {
        RectifiedLinear { amplitude: 1.0 }
    }

    pub fn spiking_relu() -> NeuronType {
        SpikingRectifiedLinear { amplitude: 1.0 }
    }

    pub fn leaky_relu(negative_slope: f32) -> NeuronType {
        LeakyReLU { negative_slope, amplitude: 1.0 }
    }

    pub fn spiking_leaky_relu(negative_slope: f32) -> NeuronType {
        SpikingLeakyReLU { negative_slope, amplitude: 1.0 }
    }

    pub fn sigmoid() -> NeuronType {
        Sigmoid { tau_ref: 1.0 }
    }

    pub fn tanh() -> NeuronType {
        Tanh { tau_ref: 1.0 }
    }

    pub fn lif_rate() -> NeuronType {
        LifRate { tau_rc: 0.02, tau_ref: 0.002, amplitude: 1.0 }
    }

    pub fn lif() -> NeuronType {
        Lif { tau_rc: 0.02, tau_ref: 0.002, amplitude: 1.0 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RectifiedLinear { .. } => "RectifiedLinear",
            SpikingRectifiedLinear { .. } => "SpikingRectifiedLinear",
            LeakyReLU { .. } => "LeakyReLU",
            SpikingLeakyReLU { .. } => "SpikingLeakyReLU",
            Sigmoid { .. } => "Sigmoid",
            Tanh { .. } => "Tanh",
            LifRate { .. } => "LIFRate",
            Lif { .. } => "LIF",
        }
    }

    pub fn is_spiking(&self) -> bool {
        matches!(self, SpikingRectifiedLinear { .. } | SpikingLeakyReLU { .. } | Lif { .. })
    }

    pub fn amplitude(&self) -> Option<f32> {
        match self {
            RectifiedLinear { amplitude }
            | SpikingRectifiedLinear { amplitude }
            | LeakyReLU { amplitude, .. }
            | SpikingLeakyReLU { amplitude, .. }
            | LifRate { amplitude, .. }
            | Lif { amplitude, .. } => Some(*amplitude),
            Sigmoid { .. } | Tanh { .. } => None,
        }
    }

    /// Output scale of the rate curve, for the types that have one.
    pub fn amplitude_mut(&mut self) -> Option<&mut f32> {
        match self {
            RectifiedLinear { amplitude }
            | SpikingRectifiedLinear { amplitude }
            | LeakyReLU { amplitude, .. }
            | SpikingLeakyReLU { amplitude, .. }
            | LifRate { amplitude, .. }
            | Lif { amplitude, .. } => Some(amplitude),
            Sigmoid { .. } | Tanh { .. } => None,
        }
    }

    /// Steady-state firing rate for input current `j`.
    pub fn rate(&self, j: f32) -> f32 {
        match self {
            RectifiedLinear { amplitude } | SpikingRectifiedLinear { amplitude } => {
                amplitude * j.max(0.0)
            }
            LeakyReLU { negative_slope, amplitude }
            | SpikingLeakyReLU { negative_slope, amplitude } => {
                amplitude * if j > 0.0 { j } else { negative_slope * j }
            }
            Sigmoid { tau_ref } => 1.0 / (1.0 + (-j).exp()) / tau_ref,
            Tanh { tau_ref } => j.tanh() / tau_ref,
            LifRate { tau_rc, tau_ref, amplitude } | Lif { tau_rc, tau_ref, amplitude } => {
                if j > 1.0 {
                    amplitude / (tau_ref + tau_rc * (1.0 / (j - 1.0)).ln_1p())
                } else {
                    0.0
                }
            }
        }
    }

    pub fn rates(&self, j: ArrayViewD<f32>) -> ArrayD<f32> {
        j.mapv(|j| self.rate(j))
    }
}

impl fmt::Display for NeuronType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}()", self.name())
    }
}

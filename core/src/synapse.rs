use std::fmt;

use crate::internal::*;

/// Linear filters applied on connections and probes.
///
/// Both have unit DC gain, so they leave steady-state values untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Synapse {
    Lowpass { tau: f32 },
    Alpha { tau: f32 },
}

impl Synapse {
    pub fn lowpass(tau: f32) -> Synapse {
        Synapse::Lowpass { tau }
    }

    pub fn alpha(tau: f32) -> Synapse {
        Synapse::Alpha { tau }
    }

    pub fn tau(&self) -> f32 {
        match self {
            Synapse::Lowpass { tau } | Synapse::Alpha { tau } => *tau,
        }
    }

    pub fn validate(&self) -> CastResult<()> {
        ensure!(
            self.tau().is_finite() && self.tau() >= 0.0,
            "Synapse time constant must be >= 0, got {}",
            self.tau()
        );
        Ok(())
    }

    /// One discrete step of the filter at time step `dt`, from state `y` towards input `x`.
    ///
    /// Alpha filters are two cascaded lowpass stages, `state` carries the first one.
    pub fn step(&self, dt: f32, x: f32, state: &mut f32, y: f32) -> f32 {
        let tau = self.tau();
        if tau <= 0.0 {
            return x;
        }
        let decay = (-dt / tau).exp();
        match self {
            Synapse::Lowpass { .. } => decay * y + (1.0 - decay) * x,
            Synapse::Alpha { .. } => {
                *state = decay * *state + (1.0 - decay) * x;
                decay * y + (1.0 - decay) * *state
            }
        }
    }
}

impl fmt::Display for Synapse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Synapse::Lowpass { tau } => write!(f, "Lowpass(tau={tau})"),
            Synapse::Alpha { tau } => write!(f, "Alpha(tau={tau})"),
        }
    }
}

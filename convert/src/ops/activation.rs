use super::{LayerConverter, UnsupportedArg, kind_mismatch};
use crate::config::Nonlinearity;
use crate::internal::*;
use crate::registry::Registry;
use crate::session::Converter;

pub fn register_all_ops(reg: &mut Registry) {
    reg.insert(Some("Activation"), activation);
    reg.insert(Some("ReLU"), relu);
    reg.insert(Some("LeakyReLU"), leaky_relu);
}

fn activation(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::Activation(op) => {
            Ok(Box::new(ActivationConverter::new(layer.id, op.activation)))
        }
        _ => Err(kind_mismatch(layer, "Activation")),
    }
}

fn relu(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::ReLU(op) => Ok(Box::new(ReluConverter::new(layer.id, op.negative_slope))),
        _ => Err(kind_mismatch(layer, "ReLU")),
    }
}

fn leaky_relu(layer: &Layer) -> CastResult<Box<dyn LayerConverter>> {
    match &layer.kind {
        LayerKind::LeakyReLU(op) => Ok(Box::new(LeakyReluConverter::new(layer.id, op.alpha))),
        _ => Err(kind_mismatch(layer, "LeakyReLU")),
    }
}

/// Applies `nonlinearity` to the single input of an invocation.
fn convert_nonlinearity(
    session: &mut Converter,
    layer: LayerId,
    invocation: usize,
    nonlinearity: Nonlinearity,
) -> CastResult<Option<ObjView>> {
    let output = session.build_target(layer, invocation, None, Some(nonlinearity))?;
    session.wire_input(layer, invocation, output.clone(), 0, false, Transform::Identity)?;
    Ok(Some(output))
}

#[derive(Debug, Clone, new)]
pub struct ActivationConverter {
    layer: LayerId,
    activation: Activation,
}

impl LayerConverter for ActivationConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        convert_nonlinearity(session, self.layer, invocation, self.activation.into())
    }
}

/// Plain or leaky rectification. Clipping and thresholds have no neuron
/// counterpart.
#[derive(Debug, Clone, new)]
pub struct ReluConverter {
    layer: LayerId,
    negative_slope: f32,
}

impl LayerConverter for ReluConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn unsupported_args(&self) -> Vec<UnsupportedArg> {
        vec![UnsupportedArg::none("max_value"), UnsupportedArg::with_default("threshold", 0.0f32)]
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let nonlinearity: Nonlinearity = if self.negative_slope == 0.0 {
            Activation::Relu.into()
        } else {
            NeuronType::leaky_relu(self.negative_slope).into()
        };
        convert_nonlinearity(session, self.layer, invocation, nonlinearity)
    }
}

#[derive(Debug, Clone, new)]
pub struct LeakyReluConverter {
    layer: LayerId,
    alpha: f32,
}

impl LayerConverter for LeakyReluConverter {
    fn layer(&self) -> LayerId {
        self.layer
    }

    fn convert(&self, session: &mut Converter, invocation: usize) -> CastResult<Option<ObjView>> {
        let neuron = NeuronType::leaky_relu(self.alpha);
        convert_nonlinearity(session, self.layer, invocation, neuron.into())
    }
}

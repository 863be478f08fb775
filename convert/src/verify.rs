//! Checking a converted network against its source model.

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn};

use crate::errors::ConvertError;
use crate::history::concrete;
use crate::internal::*;
use crate::session::Converter;

/// Something that runs a model on batched arrays.
pub trait Runner {
    fn predict(&mut self, inputs: &[ArrayD<f32>]) -> CastResult<TVec<ArrayD<f32>>>;

    fn fit(
        &mut self,
        _inputs: &[ArrayD<f32>],
        _targets: &[ArrayD<f32>],
        _epochs: usize,
    ) -> CastResult<()> {
        bail!("This runner does not support training")
    }

    fn trainable_parameter_count(&self) -> CastResult<usize>;
}

/// Runs a source model with the reference evaluator.
#[derive(Debug, Clone, new)]
pub struct SourceRunner<'g> {
    graph: &'g SourceGraph,
    model: LayerId,
}

impl Runner for SourceRunner<'_> {
    fn predict(&mut self, inputs: &[ArrayD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        self.graph.predict(self.model, inputs)
    }

    fn trainable_parameter_count(&self) -> CastResult<usize> {
        self.graph.trainable_parameter_count(self.model)
    }
}

/// Runs a network at steady state, feeding `inputs` and reading `probes`.
#[derive(Debug)]
pub struct NetworkRunner<'n> {
    simulator: Simulator<'n>,
    inputs: TVec<ObjId>,
    probes: TVec<ProbeId>,
}

impl<'n> NetworkRunner<'n> {
    pub fn new(
        network: &'n Network,
        inputs: &[ObjId],
        probes: &[ProbeId],
    ) -> CastResult<NetworkRunner<'n>> {
        let simulator = Simulator::new(network)?;
        Ok(NetworkRunner { simulator, inputs: inputs.into(), probes: probes.into() })
    }
}

impl Runner for NetworkRunner<'_> {
    fn predict(&mut self, inputs: &[ArrayD<f32>]) -> CastResult<TVec<ArrayD<f32>>> {
        ensure!(
            inputs.len() == self.inputs.len(),
            "Network takes {} inputs, got {}",
            self.inputs.len(),
            inputs.len()
        );
        let batch = inputs.first().map(|x| x.shape().first().copied().unwrap_or(1)).unwrap_or(1);
        let mut fed = HashMap::new();
        for (obj, x) in self.inputs.iter().zip(inputs) {
            ensure!(x.ndim() >= 1 && x.shape()[0] == batch, "Inputs have different batch sizes");
            let flat = x.len() / batch.max(1);
            fed.insert(*obj, x.to_shape((batch, flat))?.into_owned());
        }
        let mut outputs = self.simulator.predict(&fed, batch)?;
        self.probes
            .iter()
            .map(|p| {
                let y = outputs.remove(p).with_context(|| format!("{p} has no output"))?;
                Ok(y.into_dyn())
            })
            .collect()
    }

    fn trainable_parameter_count(&self) -> CastResult<usize> {
        self.simulator.trainable_parameter_count()
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Also train both sides and compare the trained outputs.
    pub training: bool,
    /// Test inputs, ones of `batch_size` samples when unset.
    pub inputs: Option<Vec<ArrayD<f32>>>,
    pub atol: f32,
    pub rtol: f32,
    pub epochs: usize,
    pub batch_size: usize,
}

impl Default for VerifyOptions {
    fn default() -> VerifyOptions {
        VerifyOptions {
            training: false,
            inputs: None,
            atol: 1e-8,
            rtol: 1e-5,
            epochs: 3,
            batch_size: 2,
        }
    }
}

impl VerifyOptions {
    pub fn with_training(self, training: bool) -> VerifyOptions {
        VerifyOptions { training, ..self }
    }

    pub fn with_inputs(self, inputs: Vec<ArrayD<f32>>) -> VerifyOptions {
        VerifyOptions { inputs: Some(inputs), ..self }
    }

    pub fn with_tolerances(self, atol: f32, rtol: f32) -> VerifyOptions {
        VerifyOptions { atol, rtol, ..self }
    }
}

impl Converter<'_> {
    /// Steady-state runner over the converted network, fed and read in model order.
    pub fn network_runner(&self) -> CastResult<NetworkRunner<'_>> {
        let def = self.graph().model_def(self.model())?;
        let inputs: TVec<ObjId> = def
            .inputs
            .iter()
            .map(|t| self.inputs().get(*t).map(|v| v.obj))
            .collect::<CastResult<_>>()?;
        let probes: TVec<ProbeId> = def
            .outputs
            .iter()
            .map(|t| self.outputs().get(*t).copied())
            .collect::<CastResult<_>>()?;
        NetworkRunner::new(self.network(), &inputs, &probes)
    }

    /// Compares the source model and the converted network on the same inputs.
    pub fn verify(&self, options: &VerifyOptions) -> CastResult<()> {
        let mut source = SourceRunner::new(self.graph(), self.model());
        let mut target = self.network_runner()?;
        self.verify_with(&mut source, &mut target, options)
    }

    /// Same as `verify`, with caller-provided runners for either side.
    pub fn verify_with(
        &self,
        source: &mut dyn Runner,
        target: &mut dyn Runner,
        options: &VerifyOptions,
    ) -> CastResult<()> {
        let graph = self.graph();
        let def = graph.model_def(self.model())?;
        let ones = |tensors: &[TensorId], batch: usize| -> CastResult<Vec<ArrayD<f32>>> {
            tensors
                .iter()
                .map(|t| {
                    let shape = concrete(&graph.tensor(*t)?.shape.without_batch())?;
                    let full: TVec<usize> = std::iter::once(batch).chain(shape).collect();
                    Ok(ArrayD::ones(IxDyn(&full)))
                })
                .collect()
        };
        let (inputs, batch) = match &options.inputs {
            Some(inputs) => {
                ensure!(inputs.iter().all(|x| x.ndim() > 0), "Inputs need a leading batch axis");
                let batch = inputs.first().map(|x| x.shape()[0]).unwrap_or(options.batch_size);
                (inputs.clone(), batch)
            }
            None => (ones(&def.inputs, options.batch_size)?, options.batch_size),
        };

        if options.training {
            let targets = ones(&def.outputs, batch)?;
            let network = target.trainable_parameter_count()?;
            let model = source.trainable_parameter_count()?;
            if network != model {
                return Err(ConvertError::ParameterCountMismatch { network, model }.into());
            }
            source.fit(&inputs, &targets, options.epochs).context("Training source model")?;
            target.fit(&inputs, &targets, options.epochs).context("Training converted network")?;
        }

        let expected = source.predict(&inputs)?;
        let actual = target.predict(&inputs)?;
        ensure!(
            expected.len() == actual.len(),
            "Source model has {} outputs, converted network {}",
            expected.len(),
            actual.len()
        );
        for (ix, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
            ensure!(
                e.len() == a.len(),
                "Output {} has {} values in the source model and {} in the converted network",
                ix,
                e.len(),
                a.len()
            );
            let mut failures = 0;
            let mut max_difference = 0f32;
            for (pos, (x, y)) in e.iter().zip(a.iter()).enumerate() {
                let difference = (x - y).abs();
                if !(difference <= options.atol + options.rtol * y.abs()) {
                    failures += 1;
                    info!("Output {} position {}: source {} != converted {}", ix, pos, x, y);
                    // NaN sticks once seen
                    max_difference = if difference.is_nan() || max_difference.is_nan() {
                        f32::NAN
                    } else {
                        max_difference.max(difference)
                    };
                }
            }
            if failures > 0 {
                let output = ix;
                return Err(ConvertError::VerificationMismatch { output, max_difference }.into());
            }
        }
        info!("Converted network matches source model on {} outputs", expected.len());
        Ok(())
    }
}

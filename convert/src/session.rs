//! A conversion session: walks a source model and builds the network.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ndarray::{Array1, Axis};

use crate::config::{ConverterConfig, Nonlinearity};
use crate::errors::ConvertError;
use crate::history::{ShapeSide, concrete, invocation_shape, invocation_shapes, resolve_history};
use crate::internal::*;
use crate::ops::{ActivationFunction, LayerConverter};
use crate::registry::Registry;
use crate::tensor_map::TensorMap;

/// Objects built for each (layer, invocation), one per invocation output.
pub type LayerMap = HashMap<LayerId, BTreeMap<usize, TVec<ObjView>>>;

/// Converts one model of a source graph into a `Network`.
///
/// Construction runs the whole conversion. A session that failed is not
/// reusable: build a new one.
#[derive(Debug)]
pub struct Converter<'g> {
    graph: &'g SourceGraph,
    model: LayerId,
    config: ConverterConfig,
    registry: Registry,
    network: Network,
    layer_map: LayerMap,
    converters: HashMap<LayerId, Arc<dyn LayerConverter>>,
    warnings: Vec<String>,
    inputs: TensorMap<'g, ObjView>,
    outputs: TensorMap<'g, ProbeId>,
    layers: TensorMap<'g, ObjView>,
}

impl<'g> Converter<'g> {
    pub fn new(
        graph: &'g SourceGraph,
        model: LayerId,
        config: ConverterConfig,
    ) -> CastResult<Converter<'g>> {
        Self::with_registry(graph, model, config, Registry::default())
    }

    pub fn with_registry(
        graph: &'g SourceGraph,
        model: LayerId,
        config: ConverterConfig,
        registry: Registry,
    ) -> CastResult<Converter<'g>> {
        config.validate()?;
        let root = graph.layer(model)?;
        let def = graph.model_def(model)?;
        let warnings = registry.warnings().to_vec();
        let mut session = Converter {
            graph,
            model,
            network: Network::new(root.name.clone()).with_inference_only(config.inference_only),
            config,
            registry,
            layer_map: HashMap::new(),
            converters: HashMap::new(),
            warnings,
            inputs: TensorMap::new(graph),
            outputs: TensorMap::new(graph),
            layers: TensorMap::new(graph),
        };

        let converter = session.get_converter(model)?;
        converter.convert(&mut session, 0)?;
        if def.sequential {
            session.warn("Converting sequential model to functional model");
        }

        for input in &def.inputs {
            let obj = session.tensor_obj(*input)?;
            session.inputs.insert(*input, obj);
        }
        for output in &def.outputs {
            let obj = session.tensor_obj(*output)?;
            let synapse = if session.is_neurons(&obj)? { session.config.synapse } else { None };
            info!("Probing {} ({})", obj, output);
            let probe = session.network.probe(obj, synapse)?;
            session.outputs.insert(*output, probe);
        }
        for (layer, invocations) in &session.layer_map {
            let layer = graph.layer(*layer)?;
            for (ix, objs) in invocations {
                for (tensor, obj) in layer.invocation(*ix)?.outputs.iter().zip(objs) {
                    session.layers.insert(*tensor, obj.clone());
                }
            }
        }
        debug!("Converted network:\n{}", session.network.summary());
        Ok(session)
    }

    pub fn graph(&self) -> &'g SourceGraph {
        self.graph
    }

    pub fn model(&self) -> LayerId {
        self.model
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn layer_map(&self) -> &LayerMap {
        &self.layer_map
    }

    /// Model input tensors to the nodes that receive their data.
    pub fn inputs(&self) -> &TensorMap<'g, ObjView> {
        &self.inputs
    }

    /// Model output tensors to the probes reading them.
    pub fn outputs(&self) -> &TensorMap<'g, ProbeId> {
        &self.outputs
    }

    /// Output tensors of every converted invocation to their objects.
    pub fn layers(&self) -> &TensorMap<'g, ObjView> {
        &self.layers
    }

    /// Non-fatal conditions met while converting.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{msg}");
        self.warnings.push(msg);
    }

    /// The converter bound to `layer`, built on first use.
    pub fn get_converter(&mut self, layer: LayerId) -> CastResult<Arc<dyn LayerConverter>> {
        let graph = self.graph;
        let source = graph.layer(layer)?;
        if let Some(converter) = self.converters.get(&layer) {
            if converter.has_weights() && !self.config.split_shared_weights {
                let layer = source.name.clone();
                return Err(ConvertError::DuplicateLayerApplication { layer }.into());
            }
            return Ok(converter.clone());
        }
        let type_name = source.type_name();
        let native = match self.registry.lookup(&type_name) {
            None => Err(format!("Layer type {type_name} does not have a registered converter")),
            Some(builder) => {
                let converter = builder(source)?;
                match converter.convertible(source, graph, &self.config) {
                    Ok(()) => Ok(converter),
                    Err(reason) => Err(reason.to_string()),
                }
            }
        };
        let converter = match native {
            Ok(converter) => converter,
            Err(reason) => match self.registry.fallback().filter(|_| self.config.allow_fallback) {
                Some(fallback) => {
                    self.warn(format!("{reason}. Falling back to tensor node."));
                    fallback(source)?
                }
                None => {
                    let layer = source.name.clone();
                    return Err(ConvertError::UnconvertibleLayer { layer, reason }.into());
                }
            },
        };
        debug!("Converter for {}: {:?}", source, converter);
        let converter: Arc<dyn LayerConverter> = converter.into();
        self.converters.insert(layer, converter.clone());
        Ok(converter)
    }

    pub fn is_converted(&self, layer: LayerId, invocation: usize) -> bool {
        self.layer_map.get(&layer).is_some_and(|m| m.contains_key(&invocation))
    }

    /// Converts one invocation, or returns the objects already built for it.
    pub fn convert_invocation(
        &mut self,
        layer: LayerId,
        invocation: usize,
    ) -> CastResult<TVec<ObjView>> {
        if let Some(objs) = self.layer_map.get(&layer).and_then(|m| m.get(&invocation)) {
            return Ok(objs.clone());
        }
        let converter = self.get_converter(layer)?;
        let graph = self.graph;
        let name = graph.layer(layer)?.name.as_str();
        let obj = converter
            .convert(self, invocation)
            .with_context(|| format!("Converting {name} node {invocation}"))?
            .with_context(|| format!("Converter for {layer} built no object"))?;
        let objs: TVec<ObjView> = tvec!(obj);
        self.layer_map.entry(layer).or_default().insert(invocation, objs.clone());
        Ok(objs)
    }

    /// The object holding the value of `tensor`, which must already be converted.
    pub fn tensor_obj(&self, tensor: TensorId) -> CastResult<ObjView> {
        let prov = resolve_history(self.graph, tensor)?;
        self.layer_map
            .get(&prov.layer)
            .and_then(|m| m.get(&prov.invocation))
            .and_then(|objs| objs.get(prov.output))
            .cloned()
            .with_context(|| {
                format!(
                    "{} (from {} node {}) has not been converted",
                    tensor, prov.layer, prov.invocation
                )
            })
    }

    /// The object feeding input `input` of an invocation.
    pub fn input_obj(
        &self,
        layer: LayerId,
        invocation: usize,
        input: usize,
    ) -> CastResult<ObjView> {
        let source = self.graph.layer(layer)?;
        let tensor = *source
            .invocation(invocation)?
            .inputs
            .get(input)
            .with_context(|| format!("{source} node {invocation} has no input {input}"))?;
        self.tensor_obj(tensor)
    }

    pub fn input_shape(&self, layer: LayerId, invocation: usize) -> CastResult<TVec<usize>> {
        concrete(&invocation_shape(self.graph, layer, invocation, ShapeSide::Input, false)?)
    }

    pub fn input_shapes(&self, layer: LayerId, invocation: usize) -> CastResult<TVec<TVec<usize>>> {
        invocation_shapes(self.graph, layer, invocation, ShapeSide::Input, false)?
            .iter()
            .map(concrete)
            .collect()
    }

    pub fn output_shape(&self, layer: LayerId, invocation: usize) -> CastResult<TVec<usize>> {
        concrete(&invocation_shape(self.graph, layer, invocation, ShapeSide::Output, false)?)
    }

    fn is_neurons(&self, view: &ObjView) -> CastResult<bool> {
        Ok(self.network.object(view.obj)?.kind.is_neurons())
    }

    /// Builds the object for the output of an invocation.
    ///
    /// Linear activations give a passthrough node, activations with a neuron
    /// equivalent give an ensemble, anything else a tensor node (when fallback
    /// is allowed). Objects that cannot hold biases get them from a constant
    /// node.
    pub fn build_target(
        &mut self,
        layer: LayerId,
        invocation: usize,
        biases: Option<Array1<f32>>,
        activation: Option<Nonlinearity>,
    ) -> CastResult<ObjView> {
        let graph = self.graph;
        let source = graph.layer(layer)?;
        let name = format!("{}.{}", source.name, invocation);
        let shape = self.output_shape(layer, invocation)?;
        let size: usize = shape.iter().product();
        if let Some(b) = &biases {
            ensure!(b.len() == size, "{} has {} biases for {} outputs", source, b.len(), size);
        }

        let activation = activation.unwrap_or(Nonlinearity::Activation(Activation::Linear));
        let swapped = self.config.swap(activation);
        let target = match native_nonlinearity(&swapped) {
            Some(mapped) => self.config.swap(mapped),
            None => swapped,
        };

        let mut biases = biases;
        let obj = match target {
            Nonlinearity::Activation(Activation::Linear) => {
                self.network.add_node(Node::passthrough(size), name.clone())
            }
            Nonlinearity::Neuron(mut neuron) => {
                let scale = self.config.scale_firing_rates.for_layer(layer);
                if let Some(k) = scale {
                    if let Some(b) = biases.as_mut() {
                        b.mapv_inplace(|v| v * k);
                    }
                    match neuron.amplitude_mut() {
                        Some(amplitude) => *amplitude /= k,
                        None => self.warn(format!(
                            "Firing rate scaling being applied to activation type that does not \
                             support amplitude ({}); this will change the output",
                            neuron.name()
                        )),
                    }
                }
                let trainable_bias = biases.is_some();
                let ensemble = Ensemble::new(size, neuron)
                    .with_gain(Array1::from_elem(size, scale.unwrap_or(1.0)))
                    .with_bias(biases.take().unwrap_or_else(|| Array1::zeros(size)));
                let id = self.network.add_ensemble(ensemble, name.clone());
                if !trainable_bias {
                    self.network.set_trainable(id, Some(false))?;
                }
                id
            }
            Nonlinearity::Activation(other) if self.config.allow_fallback => {
                self.warn(format!(
                    "Activation type {} does not have a native equivalent; \
                     falling back to a tensor node",
                    other.name()
                ));
                let function = Arc::new(ActivationFunction::new(other));
                let node = TensorNode::new(shape.clone(), size, function);
                self.network.add_tensor_node(node, name.clone())
            }
            Nonlinearity::Activation(other) => {
                return Err(ConvertError::UnsupportedActivation {
                    layer: source.name.clone(),
                    activation: other.name().to_string(),
                }
                .into());
            }
        };

        if let Some(b) = biases {
            let bias_node =
                self.network.add_node(Node::constant(vec![1.0]), format!("{name}.bias"));
            self.network.connect(bias_node, obj, Transform::Dense(b.insert_axis(Axis(1))), None)?;
        }
        let created = self.network.object(obj)?;
        info!("Created {} (size={})", created, created.kind.size_out());
        Ok(obj.into())
    }

    /// Connects `pre` to `post`, filtering only what leaves neurons.
    pub fn connect(
        &mut self,
        pre: ObjView,
        post: ObjView,
        transform: Transform,
        trainable: Option<bool>,
    ) -> CastResult<ConnId> {
        let synapse = if self.is_neurons(&pre)? { self.config.synapse } else { None };
        let conn = self.network.connect(pre.clone(), post.clone(), transform, synapse)?;
        self.network.set_trainable(conn, trainable)?;
        info!(
            "Connected {} to {} (trainable={})",
            self.network.object(pre.obj)?,
            self.network.object(post.obj)?,
            trainable.map(|t| t.to_string()).unwrap_or_else(|| "default".to_string())
        );
        Ok(conn)
    }

    /// Connects input `input` of an invocation to `post`.
    pub fn wire_input(
        &mut self,
        layer: LayerId,
        invocation: usize,
        post: impl Into<ObjView>,
        input: usize,
        trainable: bool,
        transform: Transform,
    ) -> CastResult<ConnId> {
        let pre = self.input_obj(layer, invocation, input)?;
        self.connect(pre, post.into(), transform, Some(trainable))
    }
}

/// The network counterpart of an activation: linear stays as is, a few
/// activations map to neuron types, neuron types map to themselves.
pub fn native_nonlinearity(nonlinearity: &Nonlinearity) -> Option<Nonlinearity> {
    match nonlinearity {
        Nonlinearity::Neuron(n) => Some(Nonlinearity::Neuron(n.clone())),
        Nonlinearity::Activation(a) => match a {
            Activation::Linear => Some(Nonlinearity::Activation(Activation::Linear)),
            Activation::Relu => Some(NeuronType::relu().into()),
            Activation::Sigmoid => Some(NeuronType::sigmoid().into()),
            Activation::Tanh => Some(NeuronType::tanh().into()),
            _ => None,
        },
    }
}

//! Steady-state evaluation of feed-forward networks.

use std::collections::{HashMap, VecDeque};

use ndarray::{Array2, ArrayView2, Axis, Ix2, IxDyn};

use crate::internal::*;
use crate::network::Network;
use crate::objects::ObjectKind;

/// Evaluates a network once per batch sample, objects in topological order.
///
/// Synapses are identity at steady state and spiking neurons are evaluated
/// through their rates, so the result is what a long enough simulation
/// settles on.
#[derive(Debug)]
pub struct Simulator<'n> {
    network: &'n Network,
    order: Vec<ObjId>,
}

impl<'n> Simulator<'n> {
    pub fn new(network: &'n Network) -> CastResult<Simulator<'n>> {
        let order = Self::topological_order(network)?;
        debug!("Simulator for {} over {} objects", network.label, order.len());
        Ok(Simulator { network, order })
    }

    pub fn network(&self) -> &Network {
        self.network
    }

    fn topological_order(network: &Network) -> CastResult<Vec<ObjId>> {
        let n = network.objects().len();
        let mut pending = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![vec![]; n];
        for conn in network.connections() {
            pending[conn.post.obj.0] += 1;
            successors[conn.pre.obj.0].push(conn.post.obj.0);
        }
        let mut ready: VecDeque<usize> = (0..n).filter(|i| pending[*i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_front() {
            order.push(ObjId(next));
            for succ in &successors[next] {
                pending[*succ] -= 1;
                if pending[*succ] == 0 {
                    ready.push_back(*succ);
                }
            }
        }
        if order.len() != n {
            let stuck =
                (0..n).find(|i| pending[*i] > 0).map(ObjId).context("Inconsistent ordering")?;
            bail!(
                "Network {} is recurrent around {}, steady-state evaluation needs a \
                 feed-forward network",
                network.label,
                network.object(stuck)?
            );
        }
        Ok(order)
    }

    /// Runs `batch` samples. `inputs` override the values of constant nodes
    /// with `(batch, size)` arrays; every probe gets a `(batch, size)` output.
    pub fn predict(
        &self,
        inputs: &HashMap<ObjId, Array2<f32>>,
        batch: usize,
    ) -> CastResult<HashMap<ProbeId, Array2<f32>>> {
        for (id, data) in inputs {
            let obj = self.network.object(*id)?;
            let node = obj.kind.as_node().filter(|n| !n.is_passthrough());
            ensure!(node.is_some(), "Only constant nodes can be fed, {} is not one", obj);
            ensure!(
                data.dim() == (batch, obj.kind.size_out()),
                "Data for {} has shape {:?}, expected {:?}",
                obj,
                data.dim(),
                (batch, obj.kind.size_out())
            );
        }
        let mut values: Vec<Option<Array2<f32>>> = vec![None; self.network.objects().len()];
        for id in &self.order {
            let obj = self.network.object(*id)?;
            let input = self.accumulate(*id, obj.kind.size_in(), batch, &values)?;
            let output = match &obj.kind {
                ObjectKind::Node(node) => match (&node.output, inputs.get(id)) {
                    (None, _) => input,
                    (Some(_), Some(fed)) => fed.clone(),
                    (Some(constant), None) => {
                        Array2::from_shape_fn((batch, constant.len()), |(_, j)| constant[j])
                    }
                },
                ObjectKind::Neurons(ens) => {
                    let current = input * &ens.gain + &ens.bias;
                    ens.neuron_type.rates(current.into_dyn().view()).into_dimensionality::<Ix2>()?
                }
                ObjectKind::TensorNode(t) => {
                    let shape: TVec<usize> =
                        std::iter::once(batch).chain(t.shape_in.iter().copied()).collect();
                    let x = input.into_shape_with_order(IxDyn(&shape))?;
                    let y = t.function.eval(x.view()).with_context(|| format!("Evaluating {obj}"))?;
                    ensure!(
                        y.len() == batch * t.size_out,
                        "{} produced {} values, expected {} per sample",
                        obj,
                        y.len(),
                        t.size_out
                    );
                    y.as_standard_layout().into_owned().into_shape_with_order((batch, t.size_out))?
                }
            };
            trace!("{} -> {:?}", obj, output.dim());
            values[id.0] = Some(output);
        }
        let mut outputs = HashMap::new();
        for probe in self.network.probes() {
            let value =
                values[probe.target.obj.0].as_ref().context("Probed object was not evaluated")?;
            outputs.insert(probe.id, select(value.view(), probe.target.indices.as_deref()));
        }
        Ok(outputs)
    }

    fn accumulate(
        &self,
        id: ObjId,
        size_in: usize,
        batch: usize,
        values: &[Option<Array2<f32>>],
    ) -> CastResult<Array2<f32>> {
        let mut input = Array2::<f32>::zeros((batch, size_in));
        for conn in self.network.connections_into(id) {
            let pre = values[conn.pre.obj.0]
                .as_ref()
                .with_context(|| format!("{} evaluated before {}", id, conn.pre))?;
            let x = select(pre.view(), conn.pre.indices.as_deref());
            let y =
                conn.transform.apply(x.view()).with_context(|| format!("Applying {}", conn.id))?;
            match conn.post.indices.as_deref() {
                None => input += &y,
                Some(ix) => {
                    for (col, target) in ix.iter().enumerate() {
                        let mut lane = input.column_mut(*target);
                        lane += &y.column(col);
                    }
                }
            }
        }
        Ok(input)
    }

    /// Trainable parameters of the simulated network.
    pub fn trainable_parameter_count(&self) -> CastResult<usize> {
        self.network.trainable_parameter_count()
    }
}

fn select(value: ArrayView2<f32>, indices: Option<&[usize]>) -> Array2<f32> {
    match indices {
        None => value.to_owned(),
        Some(ix) => value.select(Axis(1), ix),
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::objects::{Ensemble, Node, TensorFunction, TensorNode};
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, ArrayD, ArrayViewD, arr2};

    #[derive(Debug)]
    struct SumLastAxis;

    impl TensorFunction for SumLastAxis {
        fn name(&self) -> std::borrow::Cow<'_, str> {
            "sum".into()
        }

        fn eval(&self, input: ArrayViewD<f32>) -> CastResult<ArrayD<f32>> {
            Ok(input.sum_axis(Axis(input.ndim() - 1)))
        }
    }

    #[test]
    fn fed_inputs_override_constants() {
        let mut net = Network::new("net");
        let a = net.add_node(Node::constant(vec![1.0, 1.0]), "a");
        let p = net.probe(a, None).unwrap();
        let sim = Simulator::new(&net).unwrap();
        let out = sim.predict(&HashMap::new(), 2).unwrap();
        assert_eq!(out[&p], Array2::ones((2, 2)));
        let fed = arr2(&[[3.0, 4.0]]);
        let out = sim.predict(&HashMap::from([(a, fed.clone())]), 1).unwrap();
        assert_eq!(out[&p], fed);
    }

    #[test]
    fn scatter_into_slices() {
        let mut net = Network::new("net");
        let a = net.add_node(Node::constant(vec![1.0, 2.0]), "a");
        let b = net.add_node(Node::constant(vec![3.0]), "b");
        let out = net.add_node(Node::passthrough(3), "out");
        net.connect(a, out.slice(vec![0, 1]), Transform::Identity, None).unwrap();
        net.connect(b, out.slice(vec![2]), Transform::Scalar(2.0), None).unwrap();
        net.connect(a.slice(vec![1]), out.slice(vec![2]), Transform::Identity, None).unwrap();
        let p = net.probe(out, None).unwrap();
        let res = Simulator::new(&net).unwrap().predict(&HashMap::new(), 1).unwrap();
        assert_eq!(res[&p], arr2(&[[1.0, 2.0, 8.0]]));
    }

    #[test]
    fn neurons_apply_gain_and_bias() {
        let mut net = Network::new("net");
        let a = net.add_node(Node::constant(vec![1.0, -1.0]), "a");
        let ens = Ensemble::new(2, NeuronType::relu())
            .with_gain(Array1::from(vec![2.0, 2.0]))
            .with_bias(Array1::from(vec![0.5, 0.5]));
        let e = net.add_ensemble(ens, "e");
        net.connect(a, e, Transform::Identity, Some(Synapse::lowpass(0.005))).unwrap();
        let p = net.probe(e.slice(vec![0]), None).unwrap();
        let res = Simulator::new(&net).unwrap().predict(&HashMap::new(), 1).unwrap();
        assert_abs_diff_eq!(res[&p][[0, 0]], 2.5);
    }

    #[test]
    fn tensor_nodes_see_their_shape() {
        let mut net = Network::new("net");
        let a = net.add_node(Node::constant(vec![1.0; 6]), "a");
        let t = net.add_tensor_node(TensorNode::new(tvec![2, 3], 2, Arc::new(SumLastAxis)), "t");
        net.connect(a, t, Transform::Identity, None).unwrap();
        let p = net.probe(t, None).unwrap();
        let res = Simulator::new(&net).unwrap().predict(&HashMap::new(), 3).unwrap();
        assert_eq!(res[&p], Array2::from_elem((3, 2), 3.0));
    }

    #[test]
    fn recurrent_networks_are_rejected() {
        let mut net = Network::new("net");
        let a = net.add_node(Node::passthrough(1), "a");
        let b = net.add_node(Node::passthrough(1), "b");
        net.connect(a, b, Transform::Identity, None).unwrap();
        net.connect(b, a, Transform::Identity, None).unwrap();
        assert!(Simulator::new(&net).is_err());
    }
}

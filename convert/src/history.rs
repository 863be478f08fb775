//! Where tensors come from, and the shapes around an invocation.

use std::collections::HashSet;

use crate::errors::ConvertError;
use crate::internal::*;

/// The primitive layer invocation that produced `tensor`.
///
/// Outputs of called models alias the replayed internal tensors; the chain is
/// followed until a primitive layer is reached.
pub fn resolve_history(graph: &SourceGraph, tensor: TensorId) -> CastResult<Provenance> {
    let mut visited = HashSet::new();
    let mut current = tensor;
    loop {
        ensure!(visited.insert(current), "Provenance of {} loops through {}", tensor, current);
        let t = graph.tensor(current)?;
        let prov = t.provenance.ok_or(ConvertError::UnresolvedProvenance { tensor: current })?;
        if !graph.layer(prov.layer)?.is_model() {
            return Ok(prov);
        }
        let model = &graph.layer(prov.layer)?.name;
        trace!("{} is an output of model {}, following its alias", current, model);
        current = t.alias.ok_or(ConvertError::UnresolvedProvenance { tensor: current })?;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeSide {
    Input,
    Output,
}

/// Shapes of every input or output of one invocation.
pub fn invocation_shapes(
    graph: &SourceGraph,
    layer: LayerId,
    invocation: usize,
    side: ShapeSide,
    include_batch: bool,
) -> CastResult<TVec<ShapeFact>> {
    let inv = graph.layer(layer)?.invocation(invocation)?;
    let tensors = match side {
        ShapeSide::Input => &inv.inputs,
        ShapeSide::Output => &inv.outputs,
    };
    tensors
        .iter()
        .map(|t| {
            let shape = &graph.tensor(*t)?.shape;
            Ok(if include_batch { shape.clone() } else { shape.without_batch() })
        })
        .collect()
}

/// The shape of the single input or output of an invocation.
pub fn invocation_shape(
    graph: &SourceGraph,
    layer: LayerId,
    invocation: usize,
    side: ShapeSide,
    include_batch: bool,
) -> CastResult<ShapeFact> {
    let mut shapes = invocation_shapes(graph, layer, invocation, side, include_batch)?;
    ensure!(
        shapes.len() == 1,
        "{} invocation {} has {} {:?} tensors, expected one",
        graph.layer(layer)?,
        invocation,
        shapes.len(),
        side
    );
    Ok(shapes.remove(0))
}

/// Concrete dims of a batch-free shape.
pub fn concrete(shape: &ShapeFact) -> CastResult<TVec<usize>> {
    Ok(shape.as_concrete().ok_or(ConvertError::ShapeUnderspecified { shape: shape.to_string() })?)
}

#[cfg(test)]
mod test {
    use super::*;
    use ratecast_source::layers::ActivationLayer;

    #[test]
    fn nested_outputs_resolve_to_primitive_layers() {
        let mut g = SourceGraph::default();
        let x = g.input("x", &[2]).unwrap();
        let y = g.wire("act", ActivationLayer::new(Activation::Tanh), &[x]).unwrap();
        let inner = g.model("inner", &[x], &[y]).unwrap();
        let a = g.input("a", &[2]).unwrap();
        let b = g.call(inner, &[a]).unwrap()[0];
        let middle = g.model("middle", &[a], &[b]).unwrap();
        let c = g.input("c", &[2]).unwrap();
        let d = g.call(middle, &[c]).unwrap()[0];
        let act = g.layer_by_name("act").unwrap();
        let prov = resolve_history(&g, d).unwrap();
        assert_eq!(prov.layer, act);
        assert_eq!(prov.invocation, 2);
    }

    #[test]
    fn detached_tensors_have_no_history() {
        let mut g = SourceGraph::default();
        let t = g.detached(ShapeFact::batched(&[3]));
        let err = resolve_history(&g, t).unwrap_err();
        let expected = ConvertError::UnresolvedProvenance { tensor: t };
        assert_eq!(err.downcast_ref::<ConvertError>(), Some(&expected));
    }

    #[test]
    fn shapes_strip_batch() {
        let mut g = SourceGraph::default();
        let x = g.input("x", &[4, 3]).unwrap();
        let layer = g.layer_by_name("x").unwrap();
        let fixed = invocation_shape(&g, layer, 0, ShapeSide::Output, false).unwrap();
        assert_eq!(fixed, ShapeFact::concrete(&[4, 3]));
        let free = invocation_shape(&g, layer, 0, ShapeSide::Output, true).unwrap();
        assert_eq!(free, g.tensor(x).unwrap().shape);
        assert!(invocation_shape(&g, layer, 0, ShapeSide::Input, false).is_err());
        let unresolved = ShapeFact::from_dims([Some(2), None]);
        let err = concrete(&unresolved).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::ShapeUnderspecified { .. })
        ));
    }
}

//! The network scope: objects, connections, probes and their trainability.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::internal::*;
use crate::objects::{Ensemble, Node, ObjectKind, TensorNode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(pub usize);

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "probe#{}", self.0)
    }
}

/// An object, or a subset of its output (or input) positions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjView {
    pub obj: ObjId,
    pub indices: Option<Arc<[usize]>>,
}

impl ObjId {
    pub fn slice(self, indices: impl Into<Arc<[usize]>>) -> ObjView {
        ObjView { obj: self, indices: Some(indices.into()) }
    }
}

impl From<ObjId> for ObjView {
    fn from(obj: ObjId) -> ObjView {
        ObjView { obj, indices: None }
    }
}

impl From<&ObjView> for ObjView {
    fn from(view: &ObjView) -> ObjView {
        view.clone()
    }
}

impl ObjView {
    pub fn is_full(&self) -> bool {
        self.indices.is_none()
    }

    /// A view of positions `indices` of this view.
    pub fn slice(&self, indices: &[usize]) -> CastResult<ObjView> {
        let indices: Arc<[usize]> = match &self.indices {
            None => indices.into(),
            Some(mine) => indices
                .iter()
                .map(|i| {
                    let ix = mine.get(*i).copied();
                    ix.with_context(|| format!("Index {i} out of view of {}", mine.len()))
                })
                .collect::<CastResult<Vec<_>>>()?
                .into(),
        };
        Ok(ObjView { obj: self.obj, indices: Some(indices) })
    }
}

impl fmt::Display for ObjView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.indices {
            None => write!(f, "{}", self.obj),
            Some(ix) => write!(f, "{}[{} indices]", self.obj, ix.len()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Object {
    pub id: ObjId,
    pub label: String,
    pub kind: ObjectKind,
    pub trainable: Option<bool>,
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{} \"{}\">", self.kind.type_name(), self.label)
    }
}

#[derive(Clone, Debug)]
pub struct Connection {
    pub id: ConnId,
    pub pre: ObjView,
    pub post: ObjView,
    pub transform: Transform,
    pub synapse: Option<Synapse>,
    pub trainable: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct Probe {
    pub id: ProbeId,
    pub target: ObjView,
    pub synapse: Option<Synapse>,
}

/// What a trainability flag is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrainableKey {
    Object(ObjId),
    Connection(ConnId),
}

impl From<ObjId> for TrainableKey {
    fn from(id: ObjId) -> TrainableKey {
        TrainableKey::Object(id)
    }
}

impl From<ConnId> for TrainableKey {
    fn from(id: ConnId) -> TrainableKey {
        TrainableKey::Connection(id)
    }
}

/// A flat network. Ids are indices and stay valid for its lifetime.
///
/// Unset trainability flags mean "trainable", unless the network is
/// inference only, in which case nothing trains.
#[derive(Clone, Debug, Default)]
pub struct Network {
    pub label: String,
    pub inference_only: bool,
    objects: Vec<Object>,
    connections: Vec<Connection>,
    probes: Vec<Probe>,
}

impl Network {
    pub fn new(label: impl Into<String>) -> Network {
        Network { label: label.into(), ..Network::default() }
    }

    pub fn with_inference_only(self, inference_only: bool) -> Network {
        Network { inference_only, ..self }
    }

    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn object(&self, id: ObjId) -> CastResult<&Object> {
        let label = &self.label;
        self.objects.get(id.0).with_context(|| format!("No object {id} in network {label}"))
    }

    pub fn connection(&self, id: ConnId) -> CastResult<&Connection> {
        let label = &self.label;
        self.connections.get(id.0).with_context(|| format!("No connection {id} in network {label}"))
    }

    pub fn probe_info(&self, id: ProbeId) -> CastResult<&Probe> {
        self.probes.get(id.0).with_context(|| format!("No probe {id} in network {}", self.label))
    }

    pub fn connections_into(&self, obj: ObjId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.post.obj == obj)
    }

    pub fn connections_from(&self, obj: ObjId) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(move |c| c.pre.obj == obj)
    }

    pub fn add(&mut self, kind: impl Into<ObjectKind>, label: impl Into<String>) -> ObjId {
        let id = ObjId(self.objects.len());
        self.objects.push(Object { id, label: label.into(), kind: kind.into(), trainable: None });
        id
    }

    pub fn add_node(&mut self, node: Node, label: impl Into<String>) -> ObjId {
        self.add(node, label)
    }

    /// Adds an ensemble and returns its neurons.
    pub fn add_ensemble(&mut self, ensemble: Ensemble, label: impl Into<String>) -> ObjId {
        self.add(ensemble, label)
    }

    pub fn add_tensor_node(&mut self, node: TensorNode, label: impl Into<String>) -> ObjId {
        self.add(node, label)
    }

    /// Size of what a view exposes, on the output side of the object.
    pub fn view_size_out(&self, view: &ObjView) -> CastResult<usize> {
        self.view_size(view, self.object(view.obj)?.kind.size_out())
    }

    pub fn view_size_in(&self, view: &ObjView) -> CastResult<usize> {
        self.view_size(view, self.object(view.obj)?.kind.size_in())
    }

    fn view_size(&self, view: &ObjView, full: usize) -> CastResult<usize> {
        match &view.indices {
            None => Ok(full),
            Some(ix) => {
                if let Some(bad) = ix.iter().find(|i| **i >= full) {
                    let obj = self.object(view.obj)?;
                    bail!("Index {} out of bounds for {} of size {}", bad, obj, full);
                }
                Ok(ix.len())
            }
        }
    }

    pub fn connect(
        &mut self,
        pre: impl Into<ObjView>,
        post: impl Into<ObjView>,
        transform: Transform,
        synapse: Option<Synapse>,
    ) -> CastResult<ConnId> {
        let (pre, post) = (pre.into(), post.into());
        let size_in = self.view_size_out(&pre)?;
        let size_out = self.view_size_in(&post)?;
        let (pre_obj, post_obj) = (self.object(pre.obj)?, self.object(post.obj)?);
        transform
            .check(size_in, size_out)
            .with_context(|| format!("Connecting {pre_obj} to {post_obj}"))?;
        if let Some(s) = &synapse {
            s.validate()?;
        }
        let id = ConnId(self.connections.len());
        trace!("{} {} -> {}", id, pre, post);
        self.connections.push(Connection { id, pre, post, transform, synapse, trainable: None });
        Ok(id)
    }

    pub fn probe(
        &mut self,
        target: impl Into<ObjView>,
        synapse: Option<Synapse>,
    ) -> CastResult<ProbeId> {
        let target = target.into();
        self.view_size_out(&target)?;
        let id = ProbeId(self.probes.len());
        self.probes.push(Probe { id, target, synapse });
        Ok(id)
    }

    pub fn set_trainable(
        &mut self,
        key: impl Into<TrainableKey>,
        trainable: Option<bool>,
    ) -> CastResult<()> {
        match key.into() {
            TrainableKey::Object(id) => {
                let label = self.label.clone();
                self.objects
                    .get_mut(id.0)
                    .with_context(|| format!("No object {id} in network {label}"))?
                    .trainable = trainable
            }
            TrainableKey::Connection(id) => {
                let label = self.label.clone();
                self.connections
                    .get_mut(id.0)
                    .with_context(|| format!("No connection {id} in network {label}"))?
                    .trainable = trainable
            }
        }
        Ok(())
    }

    /// Explicit trainability flag, unset when never configured.
    pub fn trainable_flag(&self, key: impl Into<TrainableKey>) -> CastResult<Option<bool>> {
        Ok(match key.into() {
            TrainableKey::Object(id) => self.object(id)?.trainable,
            TrainableKey::Connection(id) => self.connection(id)?.trainable,
        })
    }

    pub fn is_trainable(&self, key: impl Into<TrainableKey>) -> CastResult<bool> {
        Ok(!self.inference_only && self.trainable_flag(key)?.unwrap_or(true))
    }

    /// Ensemble biases, trainable transforms and tensor node weights.
    pub fn trainable_parameter_count(&self) -> CastResult<usize> {
        let mut total = 0;
        for obj in &self.objects {
            if !self.is_trainable(obj.id)? {
                continue;
            }
            total += match &obj.kind {
                ObjectKind::Node(_) => 0,
                ObjectKind::Neurons(e) => e.n_neurons,
                ObjectKind::TensorNode(t) => t.function.trainable_parameter_count(),
            };
        }
        for conn in &self.connections {
            if self.is_trainable(conn.id)? {
                total += conn.transform.parameter_count();
            }
        }
        Ok(total)
    }

    /// One line per object and connection, for logs.
    pub fn summary(&self) -> String {
        let objects =
            self.objects.iter().map(|o| format!("{} {} (size {})", o.id, o, o.kind.size_out()));
        let connections =
            self.connections.iter().map(|c| format!("{} {} -> {}", c.id, c.pre, c.post));
        objects.chain(connections).join("\n")
    }
}

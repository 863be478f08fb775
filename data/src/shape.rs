use std::fmt;

use itertools::Itertools;

use crate::internal::*;

/// A static tensor shape where some dimensions may be unresolved.
///
/// Source tensors carry their batch dimension as the first, usually
/// unresolved, entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ShapeFact(pub TVec<Option<usize>>);

impl ShapeFact {
    pub fn from_dims(dims: impl IntoIterator<Item = Option<usize>>) -> ShapeFact {
        ShapeFact(dims.into_iter().collect())
    }

    pub fn concrete(dims: &[usize]) -> ShapeFact {
        ShapeFact(dims.iter().copied().map(Some).collect())
    }

    /// A shape with a leading unresolved batch dimension.
    pub fn batched(dims: &[usize]) -> ShapeFact {
        ShapeFact(std::iter::once(None).chain(dims.iter().copied().map(Some)).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.0
    }

    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(|d| d.is_some())
    }

    pub fn as_concrete(&self) -> Option<TVec<usize>> {
        self.0.iter().copied().collect()
    }

    /// Concrete dims, failing with the shape in the message if any is unresolved.
    pub fn to_concrete(&self) -> CastResult<TVec<usize>> {
        self.as_concrete().with_context(|| format!("Shape {self} has unresolved dimensions"))
    }

    pub fn without_batch(&self) -> ShapeFact {
        ShapeFact(self.0.iter().skip(1).copied().collect())
    }

    pub fn with_batch(&self, batch: Option<usize>) -> ShapeFact {
        ShapeFact(std::iter::once(batch).chain(self.0.iter().copied()).collect())
    }

    pub fn volume(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, d| d.map(|d| acc * d))
    }
}

impl fmt::Display for ShapeFact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dims = self
            .0
            .iter()
            .map(|d| d.map(|d| d.to_string()).unwrap_or_else(|| "None".into()))
            .join(", ");
        let trailing = if self.0.len() == 1 { "," } else { "" };
        write!(f, "({dims}{trailing})")
    }
}

impl From<&[usize]> for ShapeFact {
    fn from(dims: &[usize]) -> ShapeFact {
        ShapeFact::concrete(dims)
    }
}

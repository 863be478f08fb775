//! # ratecast-data
//!
//! Vocabulary shared by the source graph, the target network and the
//! converter between them: small vectors, shapes with unresolved dimensions,
//! data layouts, padding geometry, index grids, and the handful of dense
//! numeric kernels both reference evaluators rely on.

#[macro_use]
extern crate derive_new;

#[macro_use]
mod macros;

pub mod format;
pub mod indices;
pub mod kernels;
pub mod padding;
pub mod shape;

/// A Smallvec instantiation with 4 embeddable values.
///
/// Used for shapes, kernel sizes, strides and invocation inputs and outputs.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

pub type CastError = anyhow::Error;
pub type CastResult<T> = anyhow::Result<T>;

pub mod prelude {
    pub use crate::format::{DataFormat, DataShape};
    pub use crate::padding::{ComputedPaddedDim, PaddingSpec};
    pub use crate::shape::ShapeFact;
    pub use crate::tvec;
    pub use crate::{CastError, CastResult, TVec};
}

pub mod internal {
    pub use crate::indices::{axis_index, index_grid, row_major_strides, select};
    pub use crate::prelude::*;
    pub use anyhow::{Context, bail, ensure, format_err};
    pub use ndarray as rc_ndarray;
    pub use smallvec as rc_smallvec;
}

pub use anyhow;

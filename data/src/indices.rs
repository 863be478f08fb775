use std::ops::Range;

use ndarray::{ArrayD, Dimension, IxDyn, Slice};

use crate::internal::*;

/// Row-major flat indices laid out in `shape`.
pub fn index_grid(shape: &[usize]) -> ArrayD<usize> {
    let strides = row_major_strides(shape);
    ArrayD::from_shape_fn(IxDyn(shape), |ix| {
        ix.slice().iter().zip(strides.iter()).map(|(i, s)| i * s).sum()
    })
}

pub fn row_major_strides(shape: &[usize]) -> TVec<usize> {
    let mut strides: TVec<usize> = tvec![1; shape.len()];
    for ax in (0..shape.len().saturating_sub(1)).rev() {
        strides[ax] = strides[ax + 1] * shape[ax + 1];
    }
    strides
}

/// Flat indices of the sub-block of `shape` spanned by `ranges`, in row-major order.
pub fn select(shape: &[usize], ranges: &[Range<usize>]) -> CastResult<Vec<usize>> {
    ensure!(
        shape.len() == ranges.len(),
        "Selection has {} ranges for a rank {} shape",
        ranges.len(),
        shape.len()
    );
    for (axis, (dim, r)) in shape.iter().zip(ranges).enumerate() {
        ensure!(
            r.start <= r.end && r.end <= *dim,
            "Range {r:?} out of bounds on axis {axis} ({dim})"
        );
    }
    let grid = index_grid(shape);
    let view = grid.slice_each_axis(|ax| Slice::from(ranges[ax.axis.index()].clone()));
    Ok(view.iter().copied().collect())
}

/// Normalises a possibly negative axis against `rank`.
pub fn axis_index(axis: isize, rank: usize) -> CastResult<usize> {
    let resolved = if axis < 0 { axis + rank as isize } else { axis };
    ensure!(
        resolved >= 0 && (resolved as usize) < rank,
        "Axis {axis} out of range for rank {rank}"
    );
    Ok(resolved as usize)
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn grid_is_row_major() {
        let g = index_grid(&[2, 3]);
        assert_eq!(g[[1, 0]], 3);
        assert_eq!(g[[1, 2]], 5);
    }

    #[test]
    fn select_interior() {
        assert_eq!(select(&[3, 3], &[1..2, 0..3]).unwrap(), vec![3, 4, 5]);
        assert_eq!(select(&[4], &[1..3]).unwrap(), vec![1, 2]);
        assert!(select(&[4], &[1..5]).is_err());
    }

    #[test]
    fn negative_axes() {
        assert_eq!(axis_index(-1, 3).unwrap(), 2);
        assert_eq!(axis_index(0, 3).unwrap(), 0);
        assert!(axis_index(3, 3).is_err());
        assert!(axis_index(-4, 3).is_err());
    }

    proptest! {
        #[test]
        fn selection_size(h in 1usize..6, w in 1usize..6, top in 0usize..3, left in 0usize..3) {
            let top = top.min(h - 1);
            let left = left.min(w - 1);
            let sel = select(&[h, w], &[top..h, left..w]).unwrap();
            prop_assert_eq!(sel.len(), (h - top) * (w - left));
            prop_assert_eq!(sel[0], top * w + left);
        }
    }
}

use std::ops::Range;

use crate::internal::*;

/// Channel placement for batch-free shapes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    CHW,
    #[default]
    HWC,
}

impl DataFormat {
    pub fn is_channels_last(&self) -> bool {
        *self == DataFormat::HWC
    }

    pub fn c_axis(&self, rank: usize) -> usize {
        match self {
            DataFormat::CHW => 0,
            DataFormat::HWC => rank - 1,
        }
    }

    pub fn hw_axes(&self, rank: usize) -> Range<usize> {
        match self {
            DataFormat::CHW => 1..rank,
            DataFormat::HWC => 0..rank - 1,
        }
    }

    pub fn shape<S: AsRef<[usize]>>(&self, shape: S) -> DataShape {
        DataShape { fmt: *self, shape: shape.as_ref().into() }
    }

    pub fn from_c_hw(&self, c: usize, hw: &[usize]) -> DataShape {
        let mut me: TVec<usize> = tvec!();
        if *self == DataFormat::CHW {
            me.push(c);
        }
        me.extend(hw.iter().copied());
        if *self == DataFormat::HWC {
            me.push(c);
        }
        DataShape { fmt: *self, shape: me }
    }

    /// Axis permutation moving the channel axis last.
    pub fn to_hwc_permutation(&self, rank: usize) -> TVec<usize> {
        match self {
            DataFormat::CHW => (1..rank).chain(std::iter::once(0)).collect(),
            DataFormat::HWC => (0..rank).collect(),
        }
    }

    /// Axis permutation bringing a channel-last array back to this format.
    pub fn from_hwc_permutation(&self, rank: usize) -> TVec<usize> {
        match self {
            DataFormat::CHW => std::iter::once(rank - 1).chain(0..rank - 1).collect(),
            DataFormat::HWC => (0..rank).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataShape {
    pub fmt: DataFormat,
    pub shape: TVec<usize>,
}

impl DataShape {
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn c_axis(&self) -> usize {
        self.fmt.c_axis(self.rank())
    }

    #[inline]
    pub fn c_dim(&self) -> usize {
        self.shape[self.c_axis()]
    }

    #[inline]
    pub fn hw_rank(&self) -> usize {
        self.rank() - 1
    }

    #[inline]
    pub fn hw_dims(&self) -> &[usize] {
        &self.shape[self.fmt.hw_axes(self.rank())]
    }

    pub fn volume(&self) -> usize {
        self.shape.iter().product()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn channel_axis() {
        let s = DataFormat::CHW.shape([3, 5, 7]);
        assert_eq!(s.c_dim(), 3);
        assert_eq!(s.hw_dims(), &[5, 7]);
        let s = DataFormat::HWC.shape([5, 7, 3]);
        assert_eq!(s.c_dim(), 3);
        assert_eq!(s.hw_dims(), &[5, 7]);
    }

    #[test]
    fn permutations_invert() {
        let to: TVec<usize> = DataFormat::CHW.to_hwc_permutation(4);
        let back = DataFormat::CHW.from_hwc_permutation(4);
        assert_eq!(&*to, &[1, 2, 3, 0]);
        assert_eq!(&*back, &[3, 0, 1, 2]);
        assert_eq!(DataFormat::CHW.from_c_hw(2, &[4, 4]).shape.as_slice(), &[2, 4, 4]);
    }
}

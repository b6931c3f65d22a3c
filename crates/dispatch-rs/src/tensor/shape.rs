//! Dimension bookkeeping shared by tensors, graph specs and the functionalization pass.

use smallvec::SmallVec;

use crate::error::{DispatchError, DispatchResult};

/// Inline storage for sizes and strides; most tensors have at most six axes.
pub type Dims = SmallVec<[usize; 6]>;

/// Number of elements implied by `sizes`; a zero-dimensional shape holds one element.
pub fn numel(sizes: &[usize]) -> usize {
    sizes.iter().product()
}

/// Row-major strides for `sizes`.
pub fn contiguous_strides(sizes: &[usize]) -> Dims {
    let mut strides: Dims = SmallVec::from_elem(0, sizes.len());
    let mut acc = 1usize;
    for (i, dim) in sizes.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= (*dim).max(1);
    }
    strides
}

/// Reports whether `strides` describe a dense row-major layout for `sizes`.
///
/// Axes of extent one are ignored because their stride never participates in addressing.
pub fn is_contiguous(sizes: &[usize], strides: &[usize]) -> bool {
    if numel(sizes) == 0 {
        return true;
    }
    let mut expected = 1usize;
    for (dim, stride) in sizes.iter().zip(strides.iter()).rev() {
        if *dim == 1 {
            continue;
        }
        if *stride != expected {
            return false;
        }
        expected *= *dim;
    }
    true
}

/// Bytes a contiguous tensor of `sizes` needs from a storage starting at `storage_offset`.
pub fn storage_nbytes_contiguous(sizes: &[usize], itemsize: usize, storage_offset: usize) -> usize {
    let count = numel(sizes);
    if count == 0 {
        return 0;
    }
    (count + storage_offset) * itemsize
}

/// Bytes needed to address every element of a strided view.
pub fn storage_nbytes_strided(
    sizes: &[usize],
    strides: &[usize],
    itemsize: usize,
    storage_offset: usize,
) -> usize {
    if numel(sizes) == 0 {
        return 0;
    }
    let last = sizes
        .iter()
        .zip(strides.iter())
        .map(|(size, stride)| (size - 1) * stride)
        .sum::<usize>();
    (storage_offset + last + 1) * itemsize
}

/// Computes the numpy-style broadcast of two shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> DispatchResult<Dims> {
    let rank = a.len().max(b.len());
    let mut out: Dims = SmallVec::from_elem(1, rank);
    for i in 0..rank {
        let da = if i < rank - a.len() {
            1
        } else {
            a[i - (rank - a.len())]
        };
        let db = if i < rank - b.len() {
            1
        } else {
            b[i - (rank - b.len())]
        };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(DispatchError::Shape(format!(
                    "shapes {a:?} and {b:?} are not broadcastable"
                )))
            }
        };
    }
    Ok(out)
}

/// Maps a flat row-major index of `out_sizes` to the storage element of a broadcast source.
pub fn broadcast_source_index(
    mut flat: usize,
    out_sizes: &[usize],
    src_sizes: &[usize],
    src_strides: &[usize],
    src_offset: usize,
) -> usize {
    let lead = out_sizes.len() - src_sizes.len();
    let mut index = src_offset;
    for axis in (0..out_sizes.len()).rev() {
        let coord = flat % out_sizes[axis];
        flat /= out_sizes[axis];
        if axis < lead {
            continue;
        }
        let src_axis = axis - lead;
        if src_sizes[src_axis] != 1 {
            index += coord * src_strides[src_axis];
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_strides_are_row_major() {
        assert_eq!(contiguous_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn transposed_strides_are_not_contiguous() {
        assert!(is_contiguous(&[2, 3], &[3, 1]));
        assert!(!is_contiguous(&[3, 2], &[1, 3]));
        assert!(is_contiguous(&[1, 4], &[99, 1]));
    }

    #[test]
    fn storage_bytes_include_offset() {
        assert_eq!(storage_nbytes_contiguous(&[4], 4, 0), 16);
        assert_eq!(storage_nbytes_contiguous(&[4], 4, 2), 24);
        assert_eq!(storage_nbytes_contiguous(&[0, 3], 4, 2), 0);
        assert_eq!(storage_nbytes_strided(&[2, 2], &[1, 2], 4, 0), 16);
    }

    #[test]
    fn broadcast_follows_trailing_alignment() -> DispatchResult<()> {
        assert_eq!(broadcast_shapes(&[2, 3], &[3])?.as_slice(), &[2, 3]);
        assert_eq!(broadcast_shapes(&[], &[4])?.as_slice(), &[4]);
        assert_eq!(broadcast_shapes(&[4, 1], &[1, 5])?.as_slice(), &[4, 5]);
        assert!(broadcast_shapes(&[2], &[3]).is_err());
        Ok(())
    }
}

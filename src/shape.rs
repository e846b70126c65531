//! Shape broadcasting and index resolution.

use crate::{DTypeError, Result};

/// Compute the right-aligned broadcast of several shapes.
///
/// Per dimension, counted from the innermost:
/// - sizes must be equal, or one of them must be 1 or absent
/// - the resulting size is the non-1 size
pub fn broadcast_shapes(shapes: &[&[isize]]) -> Result<Vec<isize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1isize; ndim];
    for shape in shapes {
        let lead = ndim - shape.len();
        for (i, &n) in shape.iter().enumerate() {
            let target = &mut out[lead + i];
            if n == 1 {
                continue;
            }
            if *target == 1 {
                *target = n;
            } else if *target != n {
                return Err(DTypeError::Broadcast {
                    dst_shape: shapes[0].to_vec(),
                    src_shape: shape.to_vec(),
                });
            }
        }
    }
    Ok(out)
}

/// Check that `src_shape` broadcasts into `dst_shape` without changing it.
pub(crate) fn check_broadcast_into(dst_shape: &[isize], src_shape: &[isize]) -> Result<()> {
    let err = || DTypeError::Broadcast {
        dst_shape: dst_shape.to_vec(),
        src_shape: src_shape.to_vec(),
    };
    if src_shape.len() > dst_shape.len() {
        return Err(err());
    }
    let lead = dst_shape.len() - src_shape.len();
    for (i, &n) in src_shape.iter().enumerate() {
        if n != 1 && n != dst_shape[lead + i] {
            return Err(err());
        }
    }
    Ok(())
}

/// Promote strides to a broadcast target shape.
///
/// Missing leading dimensions and size-1 dimensions of the source get
/// stride 0; all other sizes must match the target.
pub(crate) fn broadcast_strides(
    target_shape: &[isize],
    src_shape: &[isize],
    src_strides: &[isize],
) -> Result<Vec<isize>> {
    check_broadcast_into(target_shape, src_shape)?;
    if src_strides.len() != src_shape.len() {
        return Err(DTypeError::InvalidArgument(format!(
            "stride count {} does not match shape {:?}",
            src_strides.len(),
            src_shape
        )));
    }
    let lead = target_shape.len() - src_shape.len();
    let mut out = vec![0isize; target_shape.len()];
    for i in 0..src_shape.len() {
        if src_shape[i] == target_shape[lead + i] {
            out[lead + i] = src_strides[i];
        }
    }
    Ok(out)
}

/// Normalize an axis number (negative counts from the end).
pub fn validate_axis(axis: isize, ndim: usize) -> Result<usize> {
    let wrapped = if axis < 0 { axis + ndim as isize } else { axis };
    if wrapped < 0 || wrapped >= ndim as isize {
        return Err(DTypeError::AxisOutOfBounds { axis, ndim });
    }
    Ok(wrapped as usize)
}

// ============================================================================
// Index ranges
// ============================================================================

/// A single index or a `start..stop` range with a step.
///
/// Omitted bounds default to the whole dimension in the direction of the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    single: bool,
}

impl IndexRange {
    /// Select one position and drop the dimension.
    pub fn index(i: isize) -> Self {
        IndexRange {
            start: Some(i),
            stop: None,
            step: 0,
            single: true,
        }
    }

    /// The whole dimension.
    pub fn all() -> Self {
        IndexRange {
            start: None,
            stop: None,
            step: 1,
            single: false,
        }
    }

    pub fn range(start: isize, stop: isize) -> Self {
        IndexRange {
            start: Some(start),
            stop: Some(stop),
            step: 1,
            single: false,
        }
    }

    pub fn from(start: isize) -> Self {
        IndexRange {
            start: Some(start),
            ..IndexRange::all()
        }
    }

    pub fn to(stop: isize) -> Self {
        IndexRange {
            stop: Some(stop),
            ..IndexRange::all()
        }
    }

    pub fn with_step(self, step: isize) -> Self {
        IndexRange {
            step,
            single: false,
            ..self
        }
    }

    #[inline]
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Whether this range selects a whole dimension in order.
    pub fn is_nop(&self, dim_size: isize) -> bool {
        !self.single
            && self.step == 1
            && self.start.map_or(true, |s| s == 0)
            && self.stop.map_or(true, |s| s == dim_size)
    }
}

/// An index range resolved against a concrete dimension size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIndex {
    pub start: isize,
    pub step: isize,
    pub count: isize,
    /// The index was a single position, so the dimension disappears.
    pub remove_dim: bool,
}

/// Resolve `idx` against a dimension of `dim_size` elements on `axis`.
pub fn apply_single_index(idx: &IndexRange, dim_size: isize, axis: usize) -> Result<ResolvedIndex> {
    if idx.single {
        let raw = idx.start.unwrap_or(0);
        let i = if raw < 0 { raw + dim_size } else { raw };
        if i < 0 || i >= dim_size {
            return Err(DTypeError::IndexOutOfBounds {
                index: raw,
                axis,
                dim_size,
            });
        }
        return Ok(ResolvedIndex {
            start: i,
            step: 0,
            count: 1,
            remove_dim: true,
        });
    }

    let out_of_bounds = || DTypeError::RangeOutOfBounds {
        start: idx.start,
        stop: idx.stop,
        step: idx.step,
        axis,
        dim_size,
    };
    let wrap = |v: isize| if v < 0 { v + dim_size } else { v };

    if idx.step > 0 {
        let start = idx.start.map_or(0, wrap);
        let stop = idx.stop.map_or(dim_size, wrap);
        if start < 0 || start > dim_size || stop < 0 || stop > dim_size {
            return Err(out_of_bounds());
        }
        let count = if stop > start {
            (stop - start + idx.step - 1) / idx.step
        } else {
            0
        };
        Ok(ResolvedIndex {
            start,
            step: idx.step,
            count,
            remove_dim: false,
        })
    } else if idx.step < 0 {
        let start = idx.start.map_or(dim_size - 1, wrap);
        // -1 is "one before the first element" and only reachable by omission.
        let stop = idx.stop.map_or(-1, wrap);
        if start < -1 || start >= dim_size || stop < -1 || stop >= dim_size {
            return Err(out_of_bounds());
        }
        let step = -idx.step;
        let count = if start > stop {
            (start - stop + step - 1) / step
        } else {
            0
        };
        Ok(ResolvedIndex {
            start,
            step: idx.step,
            count,
            remove_dim: false,
        })
    } else {
        Err(out_of_bounds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes_basic() {
        let a = [2isize, 3];
        let b = [3isize];
        let out = broadcast_shapes(&[&a, &b]).unwrap();
        assert_eq!(out, vec![2, 3]);
        let c = [4isize, 1, 3];
        assert_eq!(broadcast_shapes(&[&a, &c]).unwrap(), vec![4, 2, 3]);
    }

    #[test]
    fn test_broadcast_shapes_incompatible() {
        let a = [2isize, 3];
        let b = [4isize, 3];
        let err = broadcast_shapes(&[&a, &b]).unwrap_err();
        match err {
            DTypeError::Broadcast { .. } => {}
            _ => panic!("unexpected error: {err:?}"),
        }
    }

    #[test]
    fn test_broadcast_strides() {
        let promoted = broadcast_strides(&[4, 2, 3], &[1, 3], &[12, 4]).unwrap();
        assert_eq!(promoted, vec![0, 0, 4]);
        assert!(broadcast_strides(&[2, 3], &[2, 2], &[2, 1]).is_err());
    }

    #[test]
    fn test_validate_axis() {
        assert_eq!(validate_axis(-1, 3).unwrap(), 2);
        assert_eq!(validate_axis(0, 3).unwrap(), 0);
        let err = validate_axis(3, 3).unwrap_err();
        assert_eq!(err, DTypeError::AxisOutOfBounds { axis: 3, ndim: 3 });
    }

    #[test]
    fn test_single_index() {
        let r = apply_single_index(&IndexRange::index(-1), 5, 0).unwrap();
        assert_eq!((r.start, r.count, r.remove_dim), (4, 1, true));
        let err = apply_single_index(&IndexRange::index(5), 5, 2).unwrap_err();
        assert_eq!(
            err,
            DTypeError::IndexOutOfBounds {
                index: 5,
                axis: 2,
                dim_size: 5
            }
        );
    }

    #[test]
    fn test_range_index() {
        let r = apply_single_index(&IndexRange::range(1, 4), 5, 0).unwrap();
        assert_eq!((r.start, r.step, r.count), (1, 1, 3));
        let r = apply_single_index(&IndexRange::all().with_step(2), 5, 0).unwrap();
        assert_eq!((r.start, r.step, r.count), (0, 2, 3));
        let r = apply_single_index(&IndexRange::all().with_step(-1), 5, 0).unwrap();
        assert_eq!((r.start, r.step, r.count), (4, -1, 5));
        let r = apply_single_index(&IndexRange::range(3, 3), 5, 0).unwrap();
        assert_eq!(r.count, 0);
        assert!(apply_single_index(&IndexRange::range(0, 7), 5, 0).is_err());
        assert!(apply_single_index(&IndexRange::all().with_step(0), 5, 0).is_err());
    }

    #[test]
    fn test_is_nop() {
        assert!(IndexRange::all().is_nop(3));
        assert!(IndexRange::range(0, 3).is_nop(3));
        assert!(!IndexRange::range(0, 2).is_nop(3));
        assert!(!IndexRange::index(0).is_nop(1));
    }
}

//! Element-wise iteration over the leading fixed and strided dimensions.
//!
//! [`IterData`] keeps one index counter per dimension level and advances them
//! like the digits of a number: when a level runs past its size, the next
//! outer level steps and every inner level restarts. [`ElwiseIter`] and
//! [`ElwiseIter2`] drive that counter to visit each element pointer.

use crate::arrmeta::read_record;
use crate::ndtype::NdType;
use crate::shape::broadcast_strides;
use crate::type_id::TypeId;
use crate::types::dim::{DimArrmeta, DIM_ARRMETA_SIZE};
use crate::{DTypeError, Result};
use smallvec::SmallVec;

type Levels<T> = SmallVec<[T; 4]>;

/// Sizes and strides of the leading fixed/strided dimensions of `tp`.
///
/// Returns the element type after those dimensions and the number of
/// arrmeta bytes they occupy.
fn leading_dims(tp: &NdType, meta: &[u8]) -> (Levels<isize>, Levels<isize>, NdType, usize) {
    let (mut shape, mut strides) = (Levels::new(), Levels::new());
    let mut tp = tp.clone();
    let mut offset = 0usize;
    while matches!(tp.type_id(), TypeId::FixedDim | TypeId::StridedDim) {
        let rec: DimArrmeta = read_record(&meta[offset..]);
        shape.push(rec.dim_size);
        strides.push(rec.stride);
        offset += DIM_ARRMETA_SIZE;
        tp = match tp.dim_element_type() {
            Some(elem) => elem.clone(),
            None => break,
        };
    }
    (shape, strides, tp, offset)
}

/// Multi-index counter over nested dimension levels, outermost first.
#[derive(Debug, Clone)]
pub struct IterData {
    shape: Levels<isize>,
    strides: Levels<isize>,
    index: Levels<isize>,
    /// Pointer of the current element at each level.
    ptrs: Levels<*mut u8>,
}

impl IterData {
    /// Counter over explicit sizes and byte strides.
    pub fn new(shape: &[isize], strides: &[isize]) -> Result<Self> {
        if shape.len() != strides.len() {
            return Err(DTypeError::InvalidArgument(format!(
                "stride count {} does not match shape {:?}",
                strides.len(),
                shape
            )));
        }
        let ndim = shape.len();
        Ok(IterData {
            shape: shape.into(),
            strides: strides.into(),
            index: smallvec::smallvec![0; ndim],
            ptrs: smallvec::smallvec![std::ptr::null_mut(); ndim],
        })
    }

    /// Counter over the leading fixed/strided dimensions of `tp`.
    pub fn for_type(tp: &NdType, meta: &[u8]) -> Self {
        let (shape, strides, _, _) = leading_dims(tp, meta);
        let ndim = shape.len();
        IterData {
            shape,
            strides,
            index: smallvec::smallvec![0; ndim],
            ptrs: smallvec::smallvec![std::ptr::null_mut(); ndim],
        }
    }

    /// Counter stepping through `shape` with the given source layout
    /// broadcast into it: absent and size-1 levels get stride 0.
    pub fn broadcast(shape: &[isize], src_shape: &[isize], src_strides: &[isize]) -> Result<Self> {
        let strides = broadcast_strides(shape, src_shape, src_strides)?;
        IterData::new(shape, &strides)
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn shape(&self) -> &[isize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Whether some level has no elements.
    pub fn is_empty(&self) -> bool {
        self.shape.iter().any(|&n| n <= 0)
    }

    /// Number of elements visited by a full iteration.
    pub fn len(&self) -> usize {
        self.shape.iter().map(|&n| n.max(0) as usize).product()
    }

    /// Seek the innermost `ndim` levels to their first element at `origin`
    /// and return it.
    pub fn reset(&mut self, origin: *mut u8, ndim: usize) -> *mut u8 {
        let start = self.ndim().saturating_sub(ndim);
        for k in start..self.ndim() {
            self.index[k] = 0;
            self.ptrs[k] = origin;
        }
        origin
    }

    /// Step the level `level` positions out from the innermost one.
    ///
    /// On success every inner level restarts and the new element pointer is
    /// returned. `None` means this level ran past its end; the caller then
    /// steps the next outer level.
    pub fn incr(&mut self, level: usize) -> Option<*mut u8> {
        let k = self.ndim().checked_sub(level + 1)?;
        self.index[k] += 1;
        if self.index[k] >= self.shape[k] {
            return None;
        }
        let p = self.ptrs[k].wrapping_offset(self.strides[k]);
        self.ptrs[k] = p;
        self.reset(p, self.ndim() - k - 1);
        Some(p)
    }

    /// Advance the whole multi-index by one element with carry.
    fn advance(&mut self) -> Option<*mut u8> {
        (0..self.ndim()).find_map(|level| self.incr(level))
    }
}

/// Iterator over the element pointers of one operand.
///
/// Pointers are computed with wrapping arithmetic and never dereferenced;
/// reading through them is up to the caller.
pub struct ElwiseIter<'a> {
    data: IterData,
    element: NdType,
    element_meta: &'a [u8],
    next: Option<*mut u8>,
}

impl<'a> ElwiseIter<'a> {
    /// Iterate over `tp` data at `origin` described by `meta`.
    pub fn new(tp: &NdType, meta: &'a [u8], origin: *mut u8) -> Self {
        let (shape, strides, element, offset) = leading_dims(tp, meta);
        let mut data = IterData {
            index: smallvec::smallvec![0; shape.len()],
            ptrs: smallvec::smallvec![std::ptr::null_mut(); shape.len()],
            shape,
            strides,
        };
        let next = (!data.is_empty()).then(|| data.reset(origin, usize::MAX));
        ElwiseIter {
            data,
            element,
            element_meta: &meta[offset..],
            next,
        }
    }

    /// Type of the visited elements.
    pub fn element_type(&self) -> &NdType {
        &self.element
    }

    /// Arrmeta of the visited elements.
    pub fn element_arrmeta(&self) -> &'a [u8] {
        self.element_meta
    }

    pub fn shape(&self) -> &[isize] {
        self.data.shape()
    }
}

impl Iterator for ElwiseIter<'_> {
    type Item = *mut u8;

    fn next(&mut self) -> Option<*mut u8> {
        let current = self.next?;
        self.next = self.data.advance();
        Some(current)
    }
}

/// Iterator over destination/source pointer pairs, the source broadcast to
/// the destination's leading dimensions.
pub struct ElwiseIter2<'a> {
    dst: IterData,
    src: IterData,
    dst_element: NdType,
    src_element: NdType,
    dst_element_meta: &'a [u8],
    src_element_meta: &'a [u8],
    next: Option<(*mut u8, *const u8)>,
}

impl<'a> ElwiseIter2<'a> {
    /// Pair every element of `dst_tp` with the broadcast `src_tp` element.
    ///
    /// The source contributes as many leading dimensions as needed to leave
    /// both element types with the same remaining dimension count.
    pub fn new(
        dst_tp: &NdType,
        dst_meta: &'a [u8],
        dst_origin: *mut u8,
        src_tp: &NdType,
        src_meta: &'a [u8],
        src_origin: *const u8,
    ) -> Result<Self> {
        let (shape, strides, dst_element, dst_offset) = leading_dims(dst_tp, dst_meta);
        let (src_shape, src_strides, _, _) = leading_dims(src_tp, src_meta);
        let broadcast_error = || DTypeError::Broadcast {
            dst_shape: dst_tp.get_shape(Some(dst_meta), None),
            src_shape: src_tp.get_shape(Some(src_meta), None),
        };

        let dst_rest = dst_tp.ndim() - shape.len();
        let consumed = src_tp.ndim().saturating_sub(dst_rest);
        if consumed > src_shape.len() || consumed > shape.len() {
            return Err(broadcast_error());
        }
        let mut src_element = src_tp.clone();
        for _ in 0..consumed {
            src_element = src_element
                .dim_element_type()
                .cloned()
                .ok_or_else(broadcast_error)?;
        }
        let src_offset = consumed * DIM_ARRMETA_SIZE;

        let mut dst = IterData::new(&shape, &strides)?;
        let mut src = IterData::broadcast(
            &shape,
            &src_shape[..consumed],
            &src_strides[..consumed],
        )
        .map_err(|_| broadcast_error())?;

        let next = (!dst.is_empty()).then(|| {
            (
                dst.reset(dst_origin, usize::MAX),
                src.reset(src_origin as *mut u8, usize::MAX) as *const u8,
            )
        });
        Ok(ElwiseIter2 {
            dst,
            src,
            dst_element,
            src_element,
            dst_element_meta: &dst_meta[dst_offset..],
            src_element_meta: &src_meta[src_offset..],
            next,
        })
    }

    pub fn dst_element_type(&self) -> &NdType {
        &self.dst_element
    }

    pub fn src_element_type(&self) -> &NdType {
        &self.src_element
    }

    pub fn dst_element_arrmeta(&self) -> &'a [u8] {
        self.dst_element_meta
    }

    pub fn src_element_arrmeta(&self) -> &'a [u8] {
        self.src_element_meta
    }

    pub fn shape(&self) -> &[isize] {
        self.dst.shape()
    }
}

impl Iterator for ElwiseIter2<'_> {
    type Item = (*mut u8, *const u8);

    fn next(&mut self) -> Option<(*mut u8, *const u8)> {
        let current = self.next?;
        // Both counters share one shape, so they carry at the same level.
        self.next = match self.dst.advance() {
            Some(d) => {
                let s = self.src.advance().unwrap_or(current.1 as *mut u8);
                Some((d, s as *const u8))
            }
            None => None,
        };
        Some(current)
    }
}

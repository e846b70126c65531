//! Assignment kernels for dimension types.
//!
//! A dimension node loops over its own axis and hands the element work to a
//! child built for the element types. Sources with fewer dimensions, or a
//! size-1 dimension, broadcast with a zero stride.

use super::assignment::make_assignment_kernel;
use super::{Children, KernelBuilder, KernelNode};
use crate::arrmeta::read_record;
use crate::config::{AssignErrorMode, EvalContext};
use crate::memblock::{BlockRef, MemoryBlock};
use crate::ndtype::NdType;
use crate::type_id::TypeId;
use crate::types::dim::{
    DimArrmeta, VarDimArrmeta, VarDimData, DIM_ARRMETA_SIZE, VAR_DIM_ARRMETA_SIZE,
};
use crate::{DTypeError, Result};
use std::sync::Arc;
use tracing::trace;

fn broadcast_error(dst_tp: &NdType, dst_meta: &[u8], src_tp: &NdType, src_meta: &[u8]) -> DTypeError {
    DTypeError::Broadcast {
        dst_shape: dst_tp.get_shape(Some(dst_meta), None),
        src_shape: src_tp.get_shape(Some(src_meta), None),
    }
}

unsafe fn read_var_data(ptr: *const u8) -> VarDimData {
    std::ptr::read_unaligned(ptr as *const VarDimData)
}

/// Fixed or strided destination fed by a fixed or strided (or broadcast)
/// source.
struct StridedDimAssign {
    size: usize,
    dst_stride: isize,
    src_stride: isize,
    child: usize,
}

impl KernelNode for StridedDimAssign {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        ckb.call_strided(self.child, dst, self.dst_stride, src, &[self.src_stride], self.size)
    }

    fn name(&self) -> &'static str {
        "strided_dim_assign"
    }

    fn children(&self) -> Children {
        smallvec::smallvec![self.child]
    }
}

/// Fixed or strided destination fed by a var source.
struct VarToStridedAssign {
    size: usize,
    dst_stride: isize,
    src_stride: isize,
    src_offset: isize,
    child: usize,
}

impl KernelNode for VarToStridedAssign {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let data = read_var_data(src[0]);
        if data.size != self.size && data.size != 1 {
            return Err(DTypeError::Broadcast {
                dst_shape: vec![self.size as isize],
                src_shape: vec![data.size as isize],
            });
        }
        let s = (data.begin as *const u8).wrapping_offset(self.src_offset);
        let stride = if data.size == 1 { 0 } else { self.src_stride };
        ckb.call_strided(self.child, dst, self.dst_stride, &[s], &[stride], self.size)
    }

    fn name(&self) -> &'static str {
        "var_to_strided_assign"
    }

    fn children(&self) -> Children {
        smallvec::smallvec![self.child]
    }
}

enum VarSource {
    /// The source has fewer dimensions than the destination.
    Broadcast,
    Strided { size: usize, stride: isize },
    Var { stride: isize, offset: isize },
}

/// Var destination: allocates from the destination block when unallocated.
struct VarDimAssign {
    block: Arc<MemoryBlock>,
    dst_stride: isize,
    dst_offset: isize,
    src: VarSource,
    child: usize,
}

impl KernelNode for VarDimAssign {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let (src_size, src_ptr, src_stride) = match self.src {
            VarSource::Broadcast => (1, src[0], 0),
            VarSource::Strided { size, stride } => (size, src[0], stride),
            VarSource::Var { stride, offset } => {
                let data = read_var_data(src[0]);
                (
                    data.size,
                    (data.begin as *const u8).wrapping_offset(offset),
                    stride,
                )
            }
        };

        let mut data = read_var_data(dst);
        if data.begin == 0 {
            let bytes = src_size * self.dst_stride.unsigned_abs();
            let alloc = self.block.allocate(bytes).as_ptr();
            data = VarDimData {
                begin: alloc.wrapping_offset(-self.dst_offset) as usize,
                size: src_size,
            };
            std::ptr::write_unaligned(dst as *mut VarDimData, data);
        } else if src_size != data.size && src_size != 1 {
            return Err(DTypeError::Broadcast {
                dst_shape: vec![data.size as isize],
                src_shape: vec![src_size as isize],
            });
        }

        let d = (data.begin as *mut u8).wrapping_offset(self.dst_offset);
        let stride = if src_size == 1 { 0 } else { src_stride };
        ckb.call_strided(self.child, d, self.dst_stride, &[src_ptr], &[stride], data.size)
    }

    fn name(&self) -> &'static str {
        "var_dim_assign"
    }

    fn children(&self) -> Children {
        smallvec::smallvec![self.child]
    }
}

/// Build an assignment into a dimension type.
pub(crate) fn make_dim_assignment(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    let (dst_ndim, src_ndim) = (dst_tp.ndim(), src_tp.ndim());
    if src_ndim > dst_ndim {
        return Err(broadcast_error(dst_tp, dst_meta, src_tp, src_meta));
    }
    let dst_elem = dst_tp
        .dim_element_type()
        .ok_or_else(|| broadcast_error(dst_tp, dst_meta, src_tp, src_meta))?;
    let broadcast = src_ndim < dst_ndim;
    trace!(dst = %dst_tp, src = %src_tp, broadcast, "building dimension assignment");

    if dst_tp.type_id() == TypeId::VarDim {
        let rec: VarDimArrmeta = read_record(dst_meta);
        let block = unsafe { BlockRef::clone_arc(rec.blockref) }.ok_or_else(|| {
            DTypeError::InvalidArgument(format!("{dst_tp} arrmeta has no memory block"))
        })?;
        let elem_meta = &dst_meta[VAR_DIM_ARRMETA_SIZE..];
        let (source, child) = if broadcast {
            let child =
                make_assignment_kernel(ckb, dst_elem, elem_meta, src_tp, src_meta, errmode, ectx)?;
            (VarSource::Broadcast, child)
        } else {
            let src_elem = src_tp
                .dim_element_type()
                .ok_or_else(|| broadcast_error(dst_tp, dst_meta, src_tp, src_meta))?;
            if src_tp.type_id() == TypeId::VarDim {
                let srec: VarDimArrmeta = read_record(src_meta);
                let child = make_assignment_kernel(
                    ckb,
                    dst_elem,
                    elem_meta,
                    src_elem,
                    &src_meta[VAR_DIM_ARRMETA_SIZE..],
                    errmode,
                    ectx,
                )?;
                let source = VarSource::Var {
                    stride: srec.stride,
                    offset: srec.offset,
                };
                (source, child)
            } else {
                let srec: DimArrmeta = read_record(src_meta);
                let child = make_assignment_kernel(
                    ckb,
                    dst_elem,
                    elem_meta,
                    src_elem,
                    &src_meta[DIM_ARRMETA_SIZE..],
                    errmode,
                    ectx,
                )?;
                let source = VarSource::Strided {
                    size: srec.dim_size as usize,
                    stride: srec.stride,
                };
                (source, child)
            }
        };
        return Ok(ckb.push(VarDimAssign {
            block,
            dst_stride: rec.stride,
            dst_offset: rec.offset,
            src: source,
            child,
        }));
    }

    let rec: DimArrmeta = read_record(dst_meta);
    let elem_meta = &dst_meta[DIM_ARRMETA_SIZE..];
    let size = rec.dim_size as usize;
    if broadcast {
        let child =
            make_assignment_kernel(ckb, dst_elem, elem_meta, src_tp, src_meta, errmode, ectx)?;
        return Ok(ckb.push(StridedDimAssign {
            size,
            dst_stride: rec.stride,
            src_stride: 0,
            child,
        }));
    }

    let src_elem = src_tp
        .dim_element_type()
        .ok_or_else(|| broadcast_error(dst_tp, dst_meta, src_tp, src_meta))?;
    if src_tp.type_id() == TypeId::VarDim {
        let srec: VarDimArrmeta = read_record(src_meta);
        let child = make_assignment_kernel(
            ckb,
            dst_elem,
            elem_meta,
            src_elem,
            &src_meta[VAR_DIM_ARRMETA_SIZE..],
            errmode,
            ectx,
        )?;
        return Ok(ckb.push(VarToStridedAssign {
            size,
            dst_stride: rec.stride,
            src_stride: srec.stride,
            src_offset: srec.offset,
            child,
        }));
    }

    let srec: DimArrmeta = read_record(src_meta);
    if srec.dim_size != rec.dim_size && srec.dim_size != 1 {
        return Err(broadcast_error(dst_tp, dst_meta, src_tp, src_meta));
    }
    let child = make_assignment_kernel(
        ckb,
        dst_elem,
        elem_meta,
        src_elem,
        &src_meta[DIM_ARRMETA_SIZE..],
        errmode,
        ectx,
    )?;
    let src_stride = if srec.dim_size == 1 { 0 } else { srec.stride };
    Ok(ckb.push(StridedDimAssign {
        size,
        dst_stride: rec.stride,
        src_stride,
        child,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrmeta::Arrmeta;
    use crate::kernel::assignment::make_kernel;

    fn kernel_for(dst_tp: &NdType, dst: &Arrmeta, src_tp: &NdType, src: &Arrmeta) -> Result<crate::kernel::Kernel> {
        make_kernel(
            dst_tp,
            dst.as_bytes(),
            src_tp,
            src.as_bytes(),
            AssignErrorMode::default(),
            &EvalContext::default(),
        )
    }

    #[test]
    fn test_size_one_dimension_broadcasts() {
        let dst_tp = NdType::strided_dim(NdType::of::<i64>()).unwrap();
        let dm = Arrmeta::default_for(&dst_tp, &[4]).unwrap();
        let src_tp = NdType::fixed_dim(1, NdType::of::<i8>()).unwrap();
        let sm = Arrmeta::default_for(&src_tp, &[]).unwrap();
        let kernel = kernel_for(&dst_tp, &dm, &src_tp, &sm).unwrap();
        assert_eq!(kernel.describe(), "strided_dim_assign #1\n  builtin_assign #0\n");

        let src = [-2i8];
        let mut dst = [0i64; 4];
        unsafe {
            kernel
                .single(dst.as_mut_ptr() as *mut u8, &[src.as_ptr() as *const u8])
                .unwrap();
        }
        assert_eq!(dst, [-2; 4]);
    }

    #[test]
    fn test_more_source_dims_rejected() {
        let dst_tp = NdType::fixed_dim(2, NdType::of::<i32>()).unwrap();
        let src_tp =
            NdType::fixed_dim(2, NdType::fixed_dim(2, NdType::of::<i32>()).unwrap()).unwrap();
        let dm = Arrmeta::default_for(&dst_tp, &[]).unwrap();
        let sm = Arrmeta::default_for(&src_tp, &[]).unwrap();
        let err = kernel_for(&dst_tp, &dm, &src_tp, &sm).unwrap_err();
        assert_eq!(
            err,
            DTypeError::Broadcast {
                dst_shape: vec![2],
                src_shape: vec![2, 2],
            }
        );
    }

    #[test]
    fn test_var_source_size_checked_at_run_time() {
        let dst_tp = NdType::fixed_dim(3, NdType::of::<i32>()).unwrap();
        let src_tp = NdType::var_dim(NdType::of::<i32>()).unwrap();
        let dm = Arrmeta::default_for(&dst_tp, &[]).unwrap();
        let sm = Arrmeta::default_for(&src_tp, &[]).unwrap();
        let kernel = kernel_for(&dst_tp, &dm, &src_tp, &sm).unwrap();

        let values = [1i32, 2];
        let var = VarDimData {
            begin: values.as_ptr() as usize,
            size: 2,
        };
        let mut dst = [0i32; 3];
        let err = unsafe {
            kernel.single(
                dst.as_mut_ptr() as *mut u8,
                &[&var as *const VarDimData as *const u8],
            )
        }
        .unwrap_err();
        assert!(matches!(err, DTypeError::Broadcast { .. }));

        let one = VarDimData {
            begin: values.as_ptr() as usize,
            size: 1,
        };
        unsafe {
            kernel
                .single(
                    dst.as_mut_ptr() as *mut u8,
                    &[&one as *const VarDimData as *const u8],
                )
                .unwrap();
        }
        assert_eq!(dst, [1, 1, 1]);
    }

    #[test]
    fn test_var_destination_allocates_once() {
        let dst_tp = NdType::var_dim(NdType::of::<u16>()).unwrap();
        let dm = Arrmeta::default_for(&dst_tp, &[]).unwrap();
        let src_tp = NdType::fixed_dim(2, NdType::of::<u16>()).unwrap();
        let sm = Arrmeta::default_for(&src_tp, &[]).unwrap();
        let kernel = kernel_for(&dst_tp, &dm, &src_tp, &sm).unwrap();

        let rec: VarDimArrmeta = read_record(dm.as_bytes());
        let block = unsafe { BlockRef::clone_arc(rec.blockref) }.unwrap();
        let mut dst = VarDimData { begin: 0, size: 0 };
        let src = [5u16, 6];
        for _ in 0..2 {
            unsafe {
                kernel
                    .single(
                        &mut dst as *mut VarDimData as *mut u8,
                        &[src.as_ptr() as *const u8],
                    )
                    .unwrap();
            }
        }
        assert_eq!(dst.size, 2);
        assert_eq!(block.allocation_count(), 1);
        let stored = unsafe { std::slice::from_raw_parts(dst.begin as *const u16, 2) };
        assert_eq!(stored, &[5, 6]);
    }
}

//! Field-wise assignment into tuples and structs.

use super::assignment::make_assignment_kernel;
use super::leaf::PodCopy;
use super::{Children, KernelBuilder, KernelNode};
use crate::config::{AssignErrorMode, EvalContext};
use crate::ndtype::NdType;
use crate::types::tuple::TupleType;
use crate::{DTypeError, Result};
use tracing::trace;

struct FieldStep {
    dst_offset: usize,
    src_offset: usize,
    child: usize,
}

/// Runs one child per destination field at that field's data offset.
pub(crate) struct Fieldwise {
    steps: Vec<FieldStep>,
}

impl KernelNode for Fieldwise {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        for step in &self.steps {
            ckb.call_single(
                step.child,
                dst.add(step.dst_offset),
                &[src[0].add(step.src_offset)],
            )?;
        }
        Ok(())
    }

    unsafe fn strided(
        &self,
        ckb: &KernelBuilder,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        for step in &self.steps {
            ckb.call_strided(
                step.child,
                dst.wrapping_add(step.dst_offset),
                dst_stride,
                &[src[0].wrapping_add(step.src_offset)],
                src_stride,
                count,
            )?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fieldwise"
    }

    fn children(&self) -> Children {
        self.steps.iter().map(|s| s.child).collect()
    }
}

fn not_supported(dst_tp: &NdType, src_tp: &NdType) -> DTypeError {
    DTypeError::AssignmentNotSupported {
        src: src_tp.to_string(),
        dst: dst_tp.to_string(),
    }
}

fn instance_offsets(t: &TupleType, meta: &[u8]) -> Vec<usize> {
    (0..t.field_count())
        .map(|i| t.instance_data_offset(meta, i))
        .collect()
}

/// Pair each destination field with the source field it reads.
fn pair_fields(dst_tp: &NdType, src_tp: &NdType, dst: &TupleType, src: &TupleType) -> Result<Vec<usize>> {
    if dst.field_count() != src.field_count() {
        return Err(not_supported(dst_tp, src_tp));
    }
    match (dst_tp.as_struct(), src_tp.as_struct()) {
        (Some(ds), Some(ss)) => ds
            .field_names()
            .iter()
            .map(|name| ss.field_index(name).ok_or_else(|| not_supported(dst_tp, src_tp)))
            .collect(),
        _ => Ok((0..dst.field_count()).collect()),
    }
}

/// Build an assignment into a tuple or struct destination.
///
/// Struct sources are matched by field name, tuple sources by position, and
/// any other scalar source is broadcast into every field.
pub(crate) fn make_composite_assignment(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    let dst = dst_tp
        .composite()
        .ok_or_else(|| not_supported(dst_tp, src_tp))?;
    let dst_offsets = instance_offsets(dst, dst_meta);

    let mut steps = Vec::with_capacity(dst.field_count());
    match src_tp.composite() {
        None => {
            trace!(dst = %dst_tp, src = %src_tp, "broadcasting scalar into fields");
            for (i, field) in dst.fields().iter().enumerate() {
                let child = make_assignment_kernel(
                    ckb,
                    field,
                    dst.field_arrmeta(dst_meta, i),
                    src_tp,
                    src_meta,
                    errmode,
                    ectx,
                )?;
                steps.push(FieldStep {
                    dst_offset: dst_offsets[i],
                    src_offset: 0,
                    child,
                });
            }
        }
        Some(src) => {
            let src_offsets = instance_offsets(src, src_meta);
            if dst_tp == src_tp && dst_tp.is_pod() && dst_offsets == src_offsets {
                return Ok(ckb.push(PodCopy {
                    size: dst_tp.data_size(),
                }));
            }
            let pairs = pair_fields(dst_tp, src_tp, dst, src)?;
            for (i, &j) in pairs.iter().enumerate() {
                let child = make_assignment_kernel(
                    ckb,
                    &dst.fields()[i],
                    dst.field_arrmeta(dst_meta, i),
                    &src.fields()[j],
                    src.field_arrmeta(src_meta, j),
                    errmode,
                    ectx,
                )?;
                steps.push(FieldStep {
                    dst_offset: dst_offsets[i],
                    src_offset: src_offsets[j],
                    child,
                });
            }
        }
    }
    Ok(ckb.push(Fieldwise { steps }))
}

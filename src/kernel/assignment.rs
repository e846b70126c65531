//! Assignment kernel synthesis.
//!
//! [`make_assignment_kernel`] dispatches on the destination and source
//! types: expression types are peeled into chains of links through
//! temporary buffers, builtin pairs use the conversion table, and dimension,
//! composite and leaf families build their own nodes, recursing for their
//! elements and fields.

use super::builtin::make_builtin_assignment;
use super::chain::Chained;
use super::composite::make_composite_assignment;
use super::dim::make_dim_assignment;
use super::leaf::{
    Byteswap, DateConvert, DateProperty, FieldGetter, PodCopy, StringCopy, TypeCopy, TypeToString,
};
use super::{Kernel, KernelBuilder};
use crate::arrmeta::read_word;
use crate::config::{AssignErrorMode, EvalContext};
use crate::memblock::BlockRef;
use crate::ndtype::NdType;
use crate::type_id::TypeFlags;
use crate::types::builtin::builtin_is_lossless;
use crate::types::ExtendedType;
use crate::{DTypeError, Result};
use tracing::{debug, trace};

fn not_supported(dst_tp: &NdType, src_tp: &NdType) -> DTypeError {
    DTypeError::AssignmentNotSupported {
        src: src_tp.to_string(),
        dst: dst_tp.to_string(),
    }
}

/// Intermediate values live in plain buffers without arrmeta and are never
/// destructed.
fn check_bufferable(tp: &NdType, dst_tp: &NdType, src_tp: &NdType) -> Result<()> {
    if tp.arrmeta_size() > 0
        || tp.data_size() == 0
        || tp.flags().contains(TypeFlags::DESTRUCTOR)
    {
        return Err(not_supported(dst_tp, src_tp));
    }
    Ok(())
}

/// Whether every value of `src_tp` is represented exactly in `dst_tp`.
pub fn is_lossless_assignment(dst_tp: &NdType, src_tp: &NdType) -> bool {
    if dst_tp == src_tp {
        return true;
    }
    if let (Some(d), Some(s)) = (dst_tp.builtin_id(), src_tp.builtin_id()) {
        return builtin_is_lossless(d, s);
    }
    match (dst_tp.as_date(), src_tp.as_date()) {
        (Some(d), Some(s)) => d.unit() >= s.unit(),
        _ => false,
    }
}

/// Build a kernel that assigns `src_tp` elements into `dst_tp` elements.
///
/// The arrmeta regions must stay alive and unchanged for as long as the
/// kernel is used. Returns the handle of the root node in `ckb`.
pub fn make_assignment_kernel(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    trace!(dst = %dst_tp, src = %src_tp, %errmode, "building assignment kernel");
    if dst_tp.is_symbolic() || src_tp.is_symbolic() {
        return Err(not_supported(dst_tp, src_tp));
    }
    let errmode = if is_lossless_assignment(dst_tp, src_tp) {
        AssignErrorMode::None
    } else {
        errmode
    };

    match (dst_tp.is_expression(), src_tp.is_expression()) {
        (true, true) => {
            return make_expression_to_expression(
                ckb, dst_tp, dst_meta, src_tp, src_meta, errmode, ectx,
            )
        }
        (false, true) => {
            return make_from_expression(ckb, dst_tp, dst_meta, src_tp, src_meta, errmode, ectx)
        }
        (true, false) => {
            return make_into_expression(ckb, dst_tp, dst_meta, src_tp, src_meta, errmode, ectx)
        }
        (false, false) => {}
    }

    if let (Some(d), Some(s)) = (dst_tp.builtin_id(), src_tp.builtin_id()) {
        return Ok(make_builtin_assignment(ckb, d, s, errmode));
    }
    if dst_tp.ndim() > 0 {
        return make_dim_assignment(ckb, dst_tp, dst_meta, src_tp, src_meta, errmode, ectx);
    }
    if src_tp.ndim() > 0 {
        return Err(DTypeError::Broadcast {
            dst_shape: Vec::new(),
            src_shape: src_tp.get_shape(Some(src_meta), None),
        });
    }

    match (dst_tp.as_extended(), src_tp.as_extended()) {
        (Some(ExtendedType::Tuple(_) | ExtendedType::Struct(_)), _) => {
            make_composite_assignment(ckb, dst_tp, dst_meta, src_tp, src_meta, errmode, ectx)
        }
        (Some(ExtendedType::String(_)), Some(ExtendedType::String(_))) => {
            let block = unsafe { BlockRef::clone_arc(read_word(dst_meta, 0)) }.ok_or_else(|| {
                DTypeError::InvalidArgument(format!("{dst_tp} arrmeta has no memory block"))
            })?;
            Ok(ckb.push(StringCopy { dst_block: block }))
        }
        (Some(ExtendedType::String(_)), Some(ExtendedType::Type(_))) => {
            let block = unsafe { BlockRef::clone_arc(read_word(dst_meta, 0)) }.ok_or_else(|| {
                DTypeError::InvalidArgument(format!("{dst_tp} arrmeta has no memory block"))
            })?;
            Ok(ckb.push(TypeToString { dst_block: block }))
        }
        (Some(ExtendedType::Type(_)), Some(ExtendedType::Type(_))) => Ok(ckb.push(TypeCopy)),
        (Some(ExtendedType::FixedBytes(_)), Some(ExtendedType::FixedBytes(_)))
            if dst_tp == src_tp =>
        {
            Ok(ckb.push(PodCopy {
                size: dst_tp.data_size(),
            }))
        }
        (Some(ExtendedType::Date(d)), Some(ExtendedType::Date(s))) => {
            if d.unit() == s.unit() {
                Ok(ckb.push(PodCopy { size: 4 }))
            } else {
                Ok(ckb.push(DateConvert {
                    from: s.clone(),
                    to: d.clone(),
                }))
            }
        }
        _ => Err(not_supported(dst_tp, src_tp)),
    }
}

/// Build a finished assignment kernel.
///
/// When `ectx.trace` is set the kernel tree is logged at debug level.
pub fn make_kernel(
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<Kernel> {
    let mut ckb = KernelBuilder::new();
    let root = make_assignment_kernel(&mut ckb, dst_tp, dst_meta, src_tp, src_meta, errmode, ectx)?;
    let kernel = Kernel::new(ckb, root);
    if ectx.trace {
        debug!(dst = %dst_tp, src = %src_tp, nodes = kernel.builder().len(), "assignment kernel:\n{}", kernel.describe());
    }
    Ok(kernel)
}

// ============================================================================
// Expression chains
// ============================================================================

/// Read an expression source: storage through every link up to `dst`.
fn make_from_expression(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    let operand = src_tp.operand_type();
    if !operand.is_expression() {
        return make_read_link(ckb, dst_tp, dst_meta, src_tp, &operand, src_meta, errmode, ectx);
    }
    let op_value = operand.value_type();
    check_bufferable(&op_value, dst_tp, src_tp)?;
    let first = make_assignment_kernel(ckb, &op_value, &[], &operand, src_meta, errmode, ectx)?;
    let second = make_read_link(ckb, dst_tp, dst_meta, src_tp, &op_value, &[], errmode, ectx)?;
    Ok(Chained::push(ckb, first, op_value.data_size(), second))
}

/// One read link of `expr`, taking `input_tp` data (the operand's value) and
/// delivering into `dst`.
#[allow(clippy::too_many_arguments)]
fn make_read_link(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    expr: &NdType,
    input_tp: &NdType,
    input_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    let value = expr.value_type();

    if let (Some(prop), Some(st)) = (expr.as_property(), input_tp.as_struct()) {
        let tuple = st.tuple();
        let index = prop.index();
        let child = make_assignment_kernel(
            ckb,
            dst_tp,
            dst_meta,
            &tuple.fields()[index],
            tuple.field_arrmeta(input_meta, index),
            errmode,
            ectx,
        )?;
        return Ok(ckb.push(FieldGetter {
            offset: tuple.instance_data_offset(input_meta, index),
            child,
        }));
    }

    let direct = *dst_tp == value;
    let target_meta: &[u8] = if direct { dst_meta } else { &[] };
    let link = match expr.as_extended() {
        Some(ExtendedType::Convert(c)) => make_assignment_kernel(
            ckb,
            &value,
            target_meta,
            input_tp,
            input_meta,
            c.errmode(),
            ectx,
        )?,
        Some(ExtendedType::Byteswap(b)) => ckb.push(Byteswap {
            size: value.data_size(),
            width: b.swap_width(),
        }),
        Some(ExtendedType::Property(p)) => match input_tp.as_date() {
            Some(date) => ckb.push(DateProperty {
                date: date.clone(),
                index: p.index(),
            }),
            None => return Err(not_supported(dst_tp, expr)),
        },
        _ => return Err(not_supported(dst_tp, expr)),
    };
    if direct {
        return Ok(link);
    }
    check_bufferable(&value, dst_tp, expr)?;
    let second = make_assignment_kernel(ckb, dst_tp, dst_meta, &value, &[], errmode, ectx)?;
    Ok(Chained::push(ckb, link, value.data_size(), second))
}

/// Write into an expression destination: source to value, then every link
/// down to the storage.
fn make_into_expression(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    check_writable(dst_tp)?;
    let value = dst_tp.value_type();
    let operand = dst_tp.operand_type();

    let write = if operand.is_expression() {
        let op_value = operand.value_type();
        check_bufferable(&op_value, dst_tp, src_tp)?;
        let link = make_write_link(ckb, dst_tp, &op_value, &[], ectx)?;
        let rest = make_assignment_kernel(ckb, &operand, dst_meta, &op_value, &[], errmode, ectx)?;
        Chained::push(ckb, link, op_value.data_size(), rest)
    } else {
        make_write_link(ckb, dst_tp, &operand, dst_meta, ectx)?
    };

    if *src_tp == value {
        return Ok(write);
    }
    check_bufferable(&value, dst_tp, src_tp)?;
    let first = make_assignment_kernel(ckb, &value, &[], src_tp, src_meta, errmode, ectx)?;
    Ok(Chained::push(ckb, first, value.data_size(), write))
}

/// One write link of `expr`: its value into `out_tp` (the operand's value).
fn make_write_link(
    ckb: &mut KernelBuilder,
    expr: &NdType,
    out_tp: &NdType,
    out_meta: &[u8],
    ectx: &EvalContext,
) -> Result<usize> {
    let value = expr.value_type();
    match expr.as_extended() {
        Some(ExtendedType::Convert(c)) => {
            make_assignment_kernel(ckb, out_tp, out_meta, &value, &[], c.errmode(), ectx)
        }
        Some(ExtendedType::Byteswap(b)) => Ok(ckb.push(Byteswap {
            size: value.data_size(),
            width: b.swap_width(),
        })),
        _ => {
            check_writable(expr)?;
            Err(not_supported(expr, &value))
        }
    }
}

fn check_writable(tp: &NdType) -> Result<()> {
    match tp.as_property() {
        Some(p) => Err(DTypeError::ReadOnlyProperty {
            tp: p.operand_type().to_string(),
            name: p.name().to_string(),
        }),
        None => Ok(()),
    }
}

fn make_expression_to_expression(
    ckb: &mut KernelBuilder,
    dst_tp: &NdType,
    dst_meta: &[u8],
    src_tp: &NdType,
    src_meta: &[u8],
    errmode: AssignErrorMode,
    ectx: &EvalContext,
) -> Result<usize> {
    check_writable(dst_tp)?;
    if dst_tp == src_tp && dst_tp.storage_type().is_pod() {
        return Ok(ckb.push(PodCopy {
            size: dst_tp.data_size(),
        }));
    }
    let value = src_tp.value_type();
    check_bufferable(&value, dst_tp, src_tp)?;
    let first = make_assignment_kernel(ckb, &value, &[], src_tp, src_meta, errmode, ectx)?;
    let second = make_assignment_kernel(ckb, dst_tp, dst_meta, &value, &[], errmode, ectx)?;
    Ok(Chained::push(ckb, first, value.data_size(), second))
}

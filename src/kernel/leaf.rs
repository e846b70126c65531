//! Leaf kernels for non-builtin scalars and expression links.

use super::{Children, KernelBuilder, KernelNode};
use crate::memblock::MemoryBlock;
use crate::types::date::{DateType, DATE_NA};
use crate::types::string::{string_bytes, string_store_in};
use crate::types::type_type::{type_load, type_store};
use crate::{DTypeError, Result};
use std::sync::Arc;

/// Bytewise copy of `size` bytes.
pub(crate) struct PodCopy {
    pub(crate) size: usize,
}

impl KernelNode for PodCopy {
    #[inline]
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        std::ptr::copy(src[0], dst, self.size);
        Ok(())
    }

    unsafe fn strided(
        &self,
        _ckb: &KernelBuilder,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let size = self.size as isize;
        if dst_stride == size && src_stride[0] == size {
            std::ptr::copy(src[0], dst, self.size * count);
            return Ok(());
        }
        let (mut d, mut s) = (dst, src[0]);
        for _ in 0..count {
            std::ptr::copy(s, d, self.size);
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pod_copy"
    }
}

/// Copies string contents into the destination's memory block.
pub(crate) struct StringCopy {
    pub(crate) dst_block: Arc<MemoryBlock>,
}

impl KernelNode for StringCopy {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let bytes = string_bytes(src[0]);
        string_store_in(&self.dst_block, dst, bytes);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "string_copy"
    }
}

/// Copies a descriptor handle, retaining the stored descriptor.
pub(crate) struct TypeCopy;

impl KernelNode for TypeCopy {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let tp = type_load(src[0]);
        type_store(dst, tp.as_ref());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "type_copy"
    }
}

/// Writes the display form of a stored descriptor as a string.
pub(crate) struct TypeToString {
    pub(crate) dst_block: Arc<MemoryBlock>,
}

impl KernelNode for TypeToString {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let tp = type_load(src[0]).ok_or_else(|| {
            DTypeError::InvalidArgument("cannot format an empty type value".into())
        })?;
        string_store_in(&self.dst_block, dst, tp.to_string().as_bytes());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "type_to_string"
    }
}

/// Reverses the byte order of each `width`-byte component.
pub(crate) struct Byteswap {
    pub(crate) size: usize,
    pub(crate) width: usize,
}

impl KernelNode for Byteswap {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let mut buf = [0u8; 16];
        let tmp = &mut buf[..self.size];
        std::ptr::copy_nonoverlapping(src[0], tmp.as_mut_ptr(), self.size);
        for chunk in tmp.chunks_exact_mut(self.width) {
            chunk.reverse();
        }
        std::ptr::copy_nonoverlapping(tmp.as_ptr(), dst, self.size);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "byteswap"
    }
}

/// Reads one calendar field of a date as `int32`.
pub(crate) struct DateProperty {
    pub(crate) date: DateType,
    pub(crate) index: usize,
}

impl KernelNode for DateProperty {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let v = std::ptr::read_unaligned(src[0] as *const i32);
        let out = self.date.property_value(self.index, v);
        std::ptr::write_unaligned(dst as *mut i32, out);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "date_property"
    }
}

/// Converts dates between units; finer fields are dropped or set to 1.
pub(crate) struct DateConvert {
    pub(crate) from: DateType,
    pub(crate) to: DateType,
}

impl KernelNode for DateConvert {
    unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let v = std::ptr::read_unaligned(src[0] as *const i32);
        let out = match self.from.decode(v) {
            None => DATE_NA,
            Some((y, m, d)) => self.to.encode(y, m, d)?,
        };
        std::ptr::write_unaligned(dst as *mut i32, out);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "date_convert"
    }
}

/// Runs `child` on the source shifted by a fixed byte offset.
///
/// Used for struct field properties, whose data offset is read from the
/// source arrmeta when the kernel is built.
pub(crate) struct FieldGetter {
    pub(crate) offset: usize,
    pub(crate) child: usize,
}

impl KernelNode for FieldGetter {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        ckb.call_single(self.child, dst, &[src[0].add(self.offset)])
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
        ckb.call_strided(
            self.child,
            dst,
            dst_stride,
            &[src[0].wrapping_add(self.offset)],
            src_stride,
            count,
        )
    }

    fn name(&self) -> &'static str {
        "field_getter"
    }

    fn children(&self) -> Children {
        smallvec::smallvec![self.child]
    }
}

//! Variable-length UTF-8 strings stored in a memory block.

use crate::arrmeta::{read_record, write_record};
use crate::memblock::{BlockRef, MemoryBlock};
use crate::{DTypeError, Result};
use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Arrmeta of a string: the memory block that owns the characters.
#[repr(C)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct StringArrmeta {
    pub blockref: usize,
}

/// Data of a string: a `[begin, end)` byte range inside the block.
#[repr(C)]
#[derive(Debug, Copy, Clone, Zeroable, Pod)]
pub struct StringData {
    pub begin: usize,
    pub end: usize,
}

/// The `string` type (UTF-8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StringType;

impl StringType {
    pub const DATA_SIZE: usize = std::mem::size_of::<StringData>();
    pub const ARRMETA_SIZE: usize = std::mem::size_of::<StringArrmeta>();

    pub(crate) fn arrmeta_default_construct(&self, meta: &mut [u8]) {
        let blockref = BlockRef::into_word(MemoryBlock::new());
        write_record(meta, &StringArrmeta { blockref });
    }

    pub(crate) fn arrmeta_copy_construct(&self, dst: &mut [u8], src: &[u8]) {
        let rec: StringArrmeta = read_record(src);
        unsafe { BlockRef::retain(rec.blockref) };
        write_record(dst, &rec);
    }

    pub(crate) fn arrmeta_destruct(&self, meta: &mut [u8]) {
        let rec: StringArrmeta = read_record(meta);
        unsafe { BlockRef::release(rec.blockref) };
        write_record(meta, &StringArrmeta { blockref: 0 });
    }

    pub(crate) fn arrmeta_debug_print(
        &self,
        meta: &[u8],
        out: &mut dyn fmt::Write,
        indent: &str,
    ) -> fmt::Result {
        let rec: StringArrmeta = read_record(meta);
        writeln!(out, "{indent}string arrmeta")?;
        writeln!(out, "{indent} blockref: {:#x}", rec.blockref)
    }
}

/// Read the bytes of a string element.
///
/// # Safety
/// `data` must point to a [`StringData`] whose range lies in a live block.
pub(crate) unsafe fn string_bytes<'a>(data: *const u8) -> &'a [u8] {
    let rec = std::ptr::read_unaligned(data as *const StringData);
    if rec.begin == 0 || rec.end <= rec.begin {
        return &[];
    }
    std::slice::from_raw_parts(rec.begin as *const u8, rec.end - rec.begin)
}

/// Copy `bytes` into the block referenced by `meta` and point `data` at them.
///
/// # Safety
/// `data` must point to a writable [`StringData`]; `meta` must be a
/// constructed string arrmeta region.
pub(crate) unsafe fn string_store(meta: &[u8], data: *mut u8, bytes: &[u8]) -> Result<()> {
    let rec: StringArrmeta = read_record(meta);
    let block = BlockRef::clone_arc(rec.blockref).ok_or_else(|| {
        DTypeError::InvalidArgument("string arrmeta has no memory block".to_string())
    })?;
    string_store_in(&block, data, bytes);
    Ok(())
}

/// # Safety
/// `data` must point to a writable [`StringData`].
pub(crate) unsafe fn string_store_in(block: &MemoryBlock, data: *mut u8, bytes: &[u8]) {
    let begin = block.allocate(bytes.len()).as_ptr();
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), begin, bytes.len());
    let rec = StringData {
        begin: begin as usize,
        end: begin as usize + bytes.len(),
    };
    std::ptr::write_unaligned(data as *mut StringData, rec);
}

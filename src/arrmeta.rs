//! Owned per-instance metadata buffers.
//!
//! Arrmeta is a raw byte region laid out by its type: dimensions store a
//! `{dim_size, stride}` record, strings and var dims store a memory block
//! reference, composites store their data offsets followed by each child's
//! region at the child's arrmeta offset. The lifecycle operations themselves
//! live on [`NdType`]; [`Arrmeta`] pairs a buffer with its type and runs the
//! destructor exactly once.

use crate::ndtype::NdType;
use crate::{DTypeError, Result};
use bytemuck::Pod;
use std::fmt;

/// Size of one arrmeta word; every arrmeta size is a multiple of it.
pub(crate) const WORD: usize = std::mem::size_of::<usize>();

/// Read a fixed-layout record from the start of an arrmeta region.
#[inline]
pub(crate) fn read_record<T: Pod>(meta: &[u8]) -> T {
    bytemuck::pod_read_unaligned(&meta[..std::mem::size_of::<T>()])
}

/// Write a fixed-layout record at the start of an arrmeta region.
#[inline]
pub(crate) fn write_record<T: Pod>(meta: &mut [u8], value: &T) {
    meta[..std::mem::size_of::<T>()].copy_from_slice(bytemuck::bytes_of(value));
}

#[inline]
pub(crate) fn read_word(meta: &[u8], i: usize) -> usize {
    read_record(&meta[i * WORD..])
}

#[inline]
pub(crate) fn write_word(meta: &mut [u8], i: usize, value: usize) {
    write_record(&mut meta[i * WORD..], &value)
}

/// An arrmeta buffer bound to its type.
///
/// The buffer is constructed on creation and destructed on drop.
pub struct Arrmeta {
    tp: NdType,
    words: Box<[u64]>,
    len: usize,
}

impl Arrmeta {
    /// Run `construct` on a zeroed buffer of the type's arrmeta size.
    ///
    /// `construct` must either fully construct the region or leave nothing
    /// that needs destructing when it fails.
    pub(crate) fn construct_with<F>(tp: &NdType, construct: F) -> Result<Arrmeta>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        if tp.is_symbolic() {
            return Err(DTypeError::InvalidArgument(format!(
                "cannot construct arrmeta for symbolic type {tp}"
            )));
        }
        let len = tp.arrmeta_size();
        let words = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        let mut raw = RawArrmeta { words, len };
        construct(raw.bytes_mut())?;
        Ok(Arrmeta {
            tp: tp.clone(),
            words: raw.words,
            len,
        })
    }

    /// Default-construct arrmeta for `tp`.
    ///
    /// `shape` supplies sizes for leading strided dimensions; missing entries
    /// default to 0.
    pub fn default_for(tp: &NdType, shape: &[isize]) -> Result<Arrmeta> {
        Arrmeta::construct_with(tp, |meta| tp.arrmeta_default_construct(meta, shape))
    }

    /// Arrmeta of a concrete type whose arrmeta is empty.
    pub(crate) fn empty(tp: &NdType) -> Arrmeta {
        debug_assert!(tp.arrmeta_size() == 0 && !tp.is_symbolic());
        Arrmeta {
            tp: tp.clone(),
            words: Box::new([]),
            len: 0,
        }
    }

    /// Copy-construct arrmeta for `tp` from an existing region.
    pub fn copy_of(tp: &NdType, src: &[u8]) -> Result<Arrmeta> {
        if src.len() < tp.arrmeta_size() {
            return Err(DTypeError::InvalidArgument(format!(
                "arrmeta region of {} bytes is too small for {tp} ({} bytes)",
                src.len(),
                tp.arrmeta_size()
            )));
        }
        Arrmeta::construct_with(tp, |meta| {
            tp.arrmeta_copy_construct(meta, src);
            Ok(())
        })
    }

    #[inline]
    pub fn tp(&self) -> &NdType {
        &self.tp
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    #[inline]
    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// Human-readable dump of the arrmeta contents.
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.tp.arrmeta_debug_print(self.as_bytes(), &mut out, "");
        out
    }
}

impl Clone for Arrmeta {
    fn clone(&self) -> Self {
        let mut words = vec![0u64; self.words.len()].into_boxed_slice();
        let bytes = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut words)[..self.len];
        self.tp.arrmeta_copy_construct(bytes, self.as_bytes());
        Arrmeta {
            tp: self.tp.clone(),
            words,
            len: self.len,
        }
    }
}

impl Drop for Arrmeta {
    fn drop(&mut self) {
        let tp = self.tp.clone();
        tp.arrmeta_destruct(self.as_bytes_mut());
    }
}

impl fmt::Debug for Arrmeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arrmeta({})\n{}", self.tp, self.debug_string())
    }
}

/// A buffer that is not constructed yet and is never destructed.
struct RawArrmeta {
    words: Box<[u64]>,
    len: usize,
}

impl RawArrmeta {
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

//! Values that are themselves type descriptors.
//!
//! An element of `type` is one word holding a shared descriptor handle, or
//! zero when no descriptor has been stored. Every nonzero word owns a
//! reference; stores release the reference they overwrite and
//! [`NdType::data_destruct`] releases the rest.

use crate::ndtype::NdType;

/// `type`: a descriptor stored as data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeType;

impl TypeType {
    pub const DATA_SIZE: usize = std::mem::size_of::<usize>();
}

/// A new handle for the descriptor stored at `src`.
///
/// # Safety
/// `src` must address a constructed `type` element.
pub(crate) unsafe fn type_load(src: *const u8) -> Option<NdType> {
    NdType::clone_from_word(std::ptr::read_unaligned(src as *const usize))
}

/// Store `tp` at `dst`, releasing the descriptor it replaces.
///
/// # Safety
/// `dst` must address a constructed `type` element.
pub(crate) unsafe fn type_store(dst: *mut u8, tp: Option<&NdType>) {
    let word = tp.map_or(0, |t| t.clone().into_word());
    let old = std::ptr::replace(dst as *mut usize, word);
    NdType::release_word(old);
}

/// Release the descriptor at `data`, leaving the empty word.
///
/// # Safety
/// Same as [`type_store`].
pub(crate) unsafe fn type_release(data: *mut u8) {
    type_store(data, None)
}

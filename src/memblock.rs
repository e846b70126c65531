//! Shared pools backing variable-length data (strings, var dims).

use crate::arrmeta::Arrmeta;
use crate::ndtype::NdType;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;

/// Largest alignment a memory block allocation honors.
pub(crate) const MAX_BLOCK_ALIGN: usize = 8;

/// An append-only pool of zeroed allocations with stable addresses.
///
/// Data buffers store raw pointers into a block; the block itself is kept
/// alive by the arrmeta that references it (see [`BlockRef`]). A block
/// created with [`MemoryBlock::owning`] also owns the elements stored in it
/// and destructs them when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryBlock {
    chunks: Mutex<Vec<Box<[u64]>>>,
    objects: Option<Objects>,
}

/// Element type (and its arrmeta) of an owning block.
#[derive(Debug)]
struct Objects {
    elem: NdType,
    meta: Arrmeta,
}

impl MemoryBlock {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryBlock::default())
    }

    /// A block whose allocations hold `elem` elements laid out by `meta`,
    /// packed at `elem.data_size()` bytes.
    pub fn owning(elem: NdType, meta: Arrmeta) -> Arc<Self> {
        Arc::new(MemoryBlock {
            chunks: Mutex::default(),
            objects: Some(Objects { elem, meta }),
        })
    }

    /// Element type owned by this block, if any.
    pub fn element_type(&self) -> Option<&NdType> {
        self.objects.as_ref().map(|o| &o.elem)
    }

    /// Allocate `size` zeroed bytes aligned to at most [`MAX_BLOCK_ALIGN`].
    ///
    /// The returned pointer stays valid for the lifetime of the block.
    pub fn allocate(&self, size: usize) -> NonNull<u8> {
        if size == 0 {
            return NonNull::<u64>::dangling().cast();
        }
        let words = size.div_ceil(MAX_BLOCK_ALIGN);
        let mut chunk = vec![0u64; words].into_boxed_slice();
        let ptr = NonNull::from(&mut chunk[0]).cast::<u8>();
        self.chunks.lock().push(chunk);
        ptr
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Total bytes reserved by live allocations.
    pub fn reserved_bytes(&self) -> usize {
        self.chunks.lock().iter().map(|c| c.len() * MAX_BLOCK_ALIGN).sum()
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        let Some(objects) = &self.objects else {
            return;
        };
        let size = objects.elem.data_size();
        if size == 0 {
            return;
        }
        // Unused tails are zeroed, and zeroed elements hold nothing.
        for chunk in self.chunks.get_mut().iter_mut() {
            let bytes = bytemuck::cast_slice_mut::<u64, u8>(chunk);
            let base = bytes.as_mut_ptr();
            for i in 0..bytes.len() / size {
                unsafe { objects.elem.data_destruct(objects.meta.as_bytes(), base.add(i * size)) };
            }
        }
    }
}

// ============================================================================
// Block references stored inside arrmeta
// ============================================================================

/// Conversions between an `Arc<MemoryBlock>` and the word stored in arrmeta.
///
/// A nonzero word owns one strong count of the block.
pub(crate) struct BlockRef;

impl BlockRef {
    /// Move a strong reference into an arrmeta word.
    pub(crate) fn into_word(block: Arc<MemoryBlock>) -> usize {
        Arc::into_raw(block) as usize
    }

    /// Add a strong reference for a copied arrmeta word.
    ///
    /// # Safety
    /// `word` must be zero or a word produced by [`BlockRef::into_word`]
    /// whose reference has not been released.
    pub(crate) unsafe fn retain(word: usize) {
        if word != 0 {
            Arc::increment_strong_count(word as *const MemoryBlock);
        }
    }

    /// Release the strong reference owned by an arrmeta word.
    ///
    /// # Safety
    /// Same as [`BlockRef::retain`]; the word must not be used afterwards.
    pub(crate) unsafe fn release(word: usize) {
        if word != 0 {
            Arc::decrement_strong_count(word as *const MemoryBlock);
        }
    }

    /// Borrow the block as a new `Arc` without consuming the word's reference.
    ///
    /// # Safety
    /// Same as [`BlockRef::retain`].
    pub(crate) unsafe fn clone_arc(word: usize) -> Option<Arc<MemoryBlock>> {
        if word == 0 {
            return None;
        }
        let ptr = word as *const MemoryBlock;
        Arc::increment_strong_count(ptr);
        Some(Arc::from_raw(ptr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_zeroed_and_stable() {
        let block = MemoryBlock::new();
        let a = block.allocate(12);
        unsafe {
            assert_eq!(std::slice::from_raw_parts(a.as_ptr(), 12), &[0u8; 12]);
            a.as_ptr().write(7);
        }
        for _ in 0..64 {
            block.allocate(100);
        }
        assert_eq!(unsafe { a.as_ptr().read() }, 7);
        assert_eq!(block.allocation_count(), 65);
        assert_eq!(a.as_ptr() as usize % MAX_BLOCK_ALIGN, 0);
    }

    #[test]
    fn test_zero_size_allocation() {
        let block = MemoryBlock::new();
        block.allocate(0);
        assert_eq!(block.allocation_count(), 0);
        assert_eq!(block.reserved_bytes(), 0);
    }

    #[test]
    fn test_owning_block_releases_elements() {
        let tp = NdType::fixed_dim(2, NdType::of::<i8>()).unwrap();
        let elem = NdType::type_type();
        let block = MemoryBlock::owning(elem.clone(), Arrmeta::default_for(&elem, &[]).unwrap());
        assert_eq!(block.element_type(), Some(&elem));

        let run = block.allocate(3 * 8).as_ptr();
        unsafe {
            crate::types::type_type::type_store(run, Some(&tp));
            crate::types::type_type::type_store(run.add(16), Some(&tp));
        }
        assert_eq!(tp.use_count(), Some(3));
        drop(block);
        assert_eq!(tp.use_count(), Some(1));
    }

    #[test]
    fn test_blockref_counts() {
        let block = MemoryBlock::new();
        let word = BlockRef::into_word(block.clone());
        assert_eq!(Arc::strong_count(&block), 2);
        unsafe {
            BlockRef::retain(word);
            assert_eq!(Arc::strong_count(&block), 3);
            let borrowed = BlockRef::clone_arc(word).unwrap();
            assert_eq!(Arc::strong_count(&block), 4);
            drop(borrowed);
            BlockRef::release(word);
            BlockRef::release(word);
        }
        assert_eq!(Arc::strong_count(&block), 1);
    }
}

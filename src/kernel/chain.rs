//! Two-stage kernels joined by a temporary buffer.

use super::{Children, KernelBuilder, KernelNode};
use crate::Result;
use smallvec::{smallvec, SmallVec};

/// Elements converted per pass of the strided entry point.
const CHUNK: usize = 128;

/// `dst <- second(first(src))` with `first` writing into a buffer of
/// `mid_size`-byte elements. The intermediate type needs no arrmeta.
pub(crate) struct Chained {
    first: usize,
    second: usize,
    mid_size: usize,
}

impl Chained {
    pub(crate) fn push(ckb: &mut KernelBuilder, first: usize, mid_size: usize, second: usize) -> usize {
        ckb.push(Chained {
            first,
            second,
            mid_size,
        })
    }

    /// Scratch for `count` intermediates; small ones stay on the stack.
    fn buffer(&self, count: usize) -> SmallVec<[u64; 4]> {
        smallvec![0u64; (self.mid_size * count).div_ceil(8).max(1)]
    }
}

impl KernelNode for Chained {
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        let mut buf = self.buffer(1);
        let mid = buf.as_mut_ptr() as *mut u8;
        ckb.call_single(self.first, mid, src)?;
        ckb.call_single(self.second, dst, &[mid as *const u8])
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
        let mut buf = self.buffer(count.min(CHUNK));
        let mid = buf.as_mut_ptr() as *mut u8;
        let mid_stride = self.mid_size as isize;
        let mut done = 0usize;
        while done < count {
            let n = (count - done).min(CHUNK);
            let s = src[0].wrapping_offset(done as isize * src_stride[0]);
            let d = dst.wrapping_offset(done as isize * dst_stride);
            ckb.call_strided(self.first, mid, mid_stride, &[s], src_stride, n)?;
            ckb.call_strided(self.second, d, dst_stride, &[mid as *const u8], &[mid_stride], n)?;
            done += n;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chained"
    }

    fn children(&self) -> Children {
        smallvec![self.first, self.second]
    }
}

//! Kernel trees flattened into an arena.
//!
//! Synthesis builds children first and pushes each node into a
//! [`KernelBuilder`]; a parent stores the handles of its children and calls
//! them through the builder at run time. Every node offers a single-element
//! and a strided entry point, so any node can serve either kind of request.

pub mod assignment;
pub(crate) mod builtin;
pub(crate) mod chain;
pub mod comparison;
pub(crate) mod composite;
pub(crate) mod dim;
pub(crate) mod leaf;

use crate::Result;
use smallvec::SmallVec;
use std::fmt::Write as _;

/// Child handles of a node, for summaries.
pub type Children = SmallVec<[usize; 4]>;

/// One node of a kernel tree.
///
/// `src` holds one pointer per source operand (one for assignment, two for
/// comparison).
pub trait KernelNode: Send + Sync {
    /// Process one element.
    ///
    /// # Safety
    /// The pointers must address valid elements of the types and arrmeta the
    /// node was built for.
    unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()>;

    /// Process `count` elements spaced by the given byte strides.
    ///
    /// # Safety
    /// Same as [`KernelNode::single`] for every element addressed.
    unsafe fn strided(
        &self,
        ckb: &KernelBuilder,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        let mut d = dst;
        let mut s: SmallVec<[*const u8; 2]> = SmallVec::from_slice(src);
        for _ in 0..count {
            self.single(ckb, d, &s)?;
            d = d.wrapping_offset(dst_stride);
            for (p, &st) in s.iter_mut().zip(src_stride) {
                *p = p.wrapping_offset(st);
            }
        }
        Ok(())
    }

    /// Short name used in kernel summaries.
    fn name(&self) -> &'static str;

    fn children(&self) -> Children {
        Children::new()
    }
}

/// Arena of kernel nodes.
#[derive(Default)]
pub struct KernelBuilder {
    nodes: Vec<Box<dyn KernelNode>>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        KernelBuilder::default()
    }

    /// Add a node, returning its handle.
    pub fn push<N: KernelNode + 'static>(&mut self, node: N) -> usize {
        self.push_boxed(Box::new(node))
    }

    pub fn push_boxed(&mut self, node: Box<dyn KernelNode>) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Run node `idx` on one element.
    ///
    /// # Safety
    /// See [`KernelNode::single`].
    #[inline]
    pub unsafe fn call_single(&self, idx: usize, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        self.nodes[idx].single(self, dst, src)
    }

    /// Run node `idx` on `count` strided elements.
    ///
    /// # Safety
    /// See [`KernelNode::strided`].
    #[inline]
    pub unsafe fn call_strided(
        &self,
        idx: usize,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        self.nodes[idx].strided(self, dst, dst_stride, src, src_stride, count)
    }

    /// Indented tree of node names rooted at `root`.
    pub fn describe(&self, root: usize) -> String {
        let mut out = String::new();
        self.describe_into(root, 0, &mut out);
        out
    }

    fn describe_into(&self, idx: usize, depth: usize, out: &mut String) {
        let node = &self.nodes[idx];
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{:width$}{} #{idx}", "", node.name(), width = depth * 2);
        for child in node.children() {
            self.describe_into(child, depth + 1, out);
        }
    }
}

/// A finished kernel tree with its root.
pub struct Kernel {
    builder: KernelBuilder,
    root: usize,
}

impl Kernel {
    pub fn new(builder: KernelBuilder, root: usize) -> Self {
        Kernel { builder, root }
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.root
    }

    #[inline]
    pub fn builder(&self) -> &KernelBuilder {
        &self.builder
    }

    /// # Safety
    /// See [`KernelNode::single`].
    #[inline]
    pub unsafe fn single(&self, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        self.builder.call_single(self.root, dst, src)
    }

    /// # Safety
    /// See [`KernelNode::strided`].
    #[inline]
    pub unsafe fn strided(
        &self,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        self.builder
            .call_strided(self.root, dst, dst_stride, src, src_stride, count)
    }

    pub fn describe(&self) -> String {
        self.builder.describe(self.root)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("nodes", &self.builder.len())
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOne;

    impl KernelNode for AddOne {
        unsafe fn single(&self, _ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
            let v = std::ptr::read_unaligned(src[0] as *const i32);
            std::ptr::write_unaligned(dst as *mut i32, v + 1);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "add_one"
        }
    }

    struct Twice(usize);

    impl KernelNode for Twice {
        unsafe fn single(&self, ckb: &KernelBuilder, dst: *mut u8, src: &[*const u8]) -> Result<()> {
            ckb.call_single(self.0, dst, src)?;
            ckb.call_single(self.0, dst, &[dst as *const u8])
        }

        fn name(&self) -> &'static str {
            "twice"
        }

        fn children(&self) -> Children {
            smallvec::smallvec![self.0]
        }
    }

    #[test]
    fn test_default_strided_loop() {
        let mut ckb = KernelBuilder::new();
        let child = ckb.push(AddOne);
        let root = ckb.push(Twice(child));
        let kernel = Kernel::new(ckb, root);

        let src = [1i32, 2, 3, 4];
        let mut dst = [0i32; 2];
        unsafe {
            kernel
                .strided(
                    dst.as_mut_ptr() as *mut u8,
                    4,
                    &[src.as_ptr() as *const u8],
                    &[8],
                    2,
                )
                .unwrap();
        }
        assert_eq!(dst, [3, 5]);
        assert_eq!(kernel.describe(), "twice #1\n  add_one #0\n");
    }
}

//! Dynamic type descriptors and kernel synthesis for strided multidimensional data.
//!
//! A type descriptor ([`NdType`]) describes a memory layout at run time: builtin
//! scalars, fixed byte blobs, strings, dates, fixed/strided/variable dimensions,
//! tuples and structs, and expression types (conversions, byte swaps, derived
//! properties) layered over a storage type. Per-instance layout parameters live
//! in a separate metadata buffer ([`Arrmeta`]).
//!
//! Given a destination and a source type with their arrmeta, the synthesis
//! engine ([`make_assignment_kernel`], [`make_comparison_kernel`]) builds a
//! tree of kernels in a [`KernelBuilder`] arena that performs the element-wise
//! work, honoring an [`AssignErrorMode`].
//!
//! # Core Types
//!
//! - [`NdType`]: shared, immutable type descriptor handle
//! - [`Arrmeta`]: owned metadata buffer with its lifecycle bound to a type
//! - [`Kernel`] / [`KernelBuilder`]: flattened kernel trees
//! - [`NdValue`]: a minimal owning container (type + arrmeta + data)
//!
//! # Example
//!
//! ```rust
//! use strided_dtype::{AssignErrorMode, NdType, NdValue, TypeId};
//!
//! let src = NdValue::from_scalar(300i32);
//! let i8_tp = NdType::builtin(TypeId::Int8);
//!
//! // Checked conversion refuses to overflow.
//! assert!(src.cast(&i8_tp, AssignErrorMode::Overflow).is_err());
//!
//! // Unchecked conversion wraps.
//! let wrapped = src.cast(&i8_tp, AssignErrorMode::None).unwrap();
//! assert_eq!(wrapped.as_scalar::<i8>().unwrap(), 44);
//! ```

mod arrmeta;
mod config;
mod iter;
pub mod kernel;
mod memblock;
mod ndtype;
mod shape;
mod type_id;
pub mod types;
mod value;

// ============================================================================
// Type descriptors
// ============================================================================
pub use ndtype::{NdType, TypeVarMap};
pub use type_id::{TypeFlags, TypeId, TypeKind};
pub use types::builtin::{promote_types, BuiltinScalar};
pub use types::date::DateUnit;
pub use types::{PropertyValue, TypeProperty};

// ============================================================================
// Arrmeta and memory blocks
// ============================================================================
pub use arrmeta::Arrmeta;
pub use memblock::MemoryBlock;

// ============================================================================
// Kernels
// ============================================================================
pub use kernel::assignment::{is_lossless_assignment, make_assignment_kernel, make_kernel};
pub use kernel::comparison::{make_comparison_kernel, make_comparison, ComparisonType};
pub use kernel::{Kernel, KernelBuilder, KernelNode};

// ============================================================================
// Configuration
// ============================================================================
pub use config::{AssignErrorMode, EvalContext};

// ============================================================================
// Iteration, shapes and values
// ============================================================================
pub use iter::{ElwiseIter, ElwiseIter2, IterData};
pub use shape::{apply_single_index, broadcast_shapes, validate_axis, IndexRange, ResolvedIndex};
pub use value::{struct_concat, typed_data_copy, NdValue};

// ============================================================================
// Error types
// ============================================================================

/// Errors raised by type construction, kernel synthesis and kernel execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DTypeError {
    /// Two shapes cannot be aligned by right-aligned broadcasting.
    #[error("broadcast error: cannot broadcast shape {src_shape:?} into shape {dst_shape:?}")]
    Broadcast {
        dst_shape: Vec<isize>,
        src_shape: Vec<isize>,
    },

    /// An integer index is outside `[0, dim_size)` (after negative wrap).
    #[error("index out of bounds: index {index} is out of bounds for axis {axis} with size {dim_size}")]
    IndexOutOfBounds {
        index: isize,
        axis: usize,
        dim_size: isize,
    },

    /// A range index does not fit into the dimension.
    #[error(
        "range out of bounds: range {start:?}..{stop:?} by {step} is out of bounds for axis {axis} with size {dim_size}"
    )]
    RangeOutOfBounds {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
        axis: usize,
        dim_size: isize,
    },

    /// More indices were supplied than the type has dimensions.
    #[error("too many indices: provided {nindices} indices to type {tp} with {ndim} dimensions")]
    TooManyIndices {
        tp: String,
        nindices: usize,
        ndim: usize,
    },

    /// An axis number is outside `[0, ndim)`.
    #[error("axis out of bounds: axis {axis} is not valid for {ndim} dimensions")]
    AxisOutOfBounds { axis: isize, ndim: usize },

    /// A raw type id does not name any known type family.
    #[error("invalid type id: {0}")]
    InvalidTypeId(u32),

    /// No kernel path exists between the two types.
    #[error("assignment from {src} to {dst} is not supported")]
    AssignmentNotSupported { src: String, dst: String },

    /// The two types have no comparison kernel for the requested comparison.
    #[error("cannot compare {lhs} with {rhs} using {comparison}")]
    NotComparable {
        lhs: String,
        rhs: String,
        comparison: String,
    },

    /// The type does not define the named elementwise property.
    #[error("type {tp} does not have a property named {name:?}")]
    UnknownProperty { tp: String, name: String },

    /// The property exists but cannot be written.
    #[error("property {name:?} of type {tp} is read-only")]
    ReadOnlyProperty { tp: String, name: String },

    /// A checked conversion found a value outside the destination range.
    #[error("overflow while assigning {src_type} value {value} to {dst_type}")]
    Overflow {
        src_type: String,
        dst_type: String,
        value: String,
    },

    /// A checked conversion would drop a fractional part.
    #[error("fractional part lost while assigning {src_type} value {value} to {dst_type}")]
    Fractional {
        src_type: String,
        dst_type: String,
        value: String,
    },

    /// A checked conversion would round the value.
    #[error("inexact value while assigning {src_type} value {value} to {dst_type}")]
    Inexact {
        src_type: String,
        dst_type: String,
        value: String,
    },

    /// A checked complex to real conversion found a nonzero imaginary part.
    #[error("loss of imaginary component while assigning {src_type} value {value} to {dst_type}")]
    ImaginaryLoss {
        src_type: String,
        dst_type: String,
        value: String,
    },

    /// A factory or accessor was given arguments it cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for dtype operations.
pub type Result<T> = std::result::Result<T, DTypeError>;

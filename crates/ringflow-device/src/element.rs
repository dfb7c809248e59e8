//! Fixed-width numeric element types
//!
//! Kernel arguments are typed blocks of one of these primitives. The
//! runtime tag ([`ElementType`]) travels with descriptors, while the
//! compile-time trait ([`Element`]) drives conversion to and from the raw
//! byte blocks the device works with.

use std::fmt;

use crate::error::{Error, Result};

/// Runtime tag for a supported element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ElementType {
    /// Width of one element in bytes
    #[must_use]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    /// Short lowercase name (`i32`, `f64`, ...)
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::I16 => "i16",
            ElementType::U16 => "u16",
            ElementType::I32 => "i32",
            ElementType::U32 => "u32",
            ElementType::I64 => "i64",
            ElementType::U64 => "u64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }

    /// Check for floating point types
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primitive that can be stored in a device buffer or passed as a scalar
pub trait Element: bytemuck::Pod + Send + Sync + fmt::Debug {
    /// Runtime tag of this type
    const TYPE: ElementType;
}

macro_rules! impl_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$tag;
            }
        )*
    };
}

impl_element! {
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// Copy typed values into a byte block
#[must_use]
pub fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

/// Decode a byte block into typed values
///
/// The block does not need to be aligned for `T`.
///
/// # Errors
/// Returns an error if the length is not a multiple of the element size.
pub fn from_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let width = T::TYPE.size_in_bytes();
    if bytes.len() % width != 0 {
        return Err(Error::BufferSizeMismatch {
            expected: bytes.len() - bytes.len() % width,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

//! Little-endian reading of primitive values from byte buffers.
//!
//! Every method body field (header words, operands, exception clauses) is little-endian.
//! The [`CilIO`] trait ties each primitive to its fixed-size byte array so that
//! [`read_le_at`] can stay generic and bounds-checked. Writers go through the
//! primitives' own `to_le_bytes`.

use crate::{Error::OutOfBounds, Result};

/// Endian-aware conversion between a primitive and its byte representation.
pub trait CilIO: Sized {
    /// The fixed-size byte array holding one encoded value
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $n:literal),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $n];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
}

/// Read a value of type `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a value of type `T` at `offset`, advancing `offset` past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in `data`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

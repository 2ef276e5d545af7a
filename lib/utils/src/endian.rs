//! ## Endianness Module
//! This module provides some structs to better resolve the data in specific endianness rules
//!
//! All the types declared here implements [EndianData<T>],
//! which defines [EndianData<T>::value] function to parse the data into the endianness of the current arch.
//! Device tree cells are big endian, while most I2C register payloads are little endian.

///[u16] in Big Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BigEndian16(u16);

///[u16] in Little Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LittleEndian16(u16);

///[u32] in Big Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BigEndian32(u32);

///[u32] in Little Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct LittleEndian32(u32);

///[u64] in Big Endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BigEndian64(u64);

/// This trait defines a packed data in memory with some specific endianness.
pub trait EndianData<T>: Copy + Clone {
    /// Width of the packed representation in bytes.
    const SIZE: usize;

    /// Parse the value into the endianness of the current architecture.
    fn value(&self) -> T;

    /// Pack a host value.
    fn from_value(value: T) -> Self;

    /// Reinterpret the first [Self::SIZE] bytes of `bytes` as packed data.
    ///
    /// Return [None] if `bytes` is too short.
    fn from_bytes(bytes: &[u8]) -> Option<Self>;
}

/// Implement an [EndianData<T>] for a specific type, and explain the data in big endianess
macro_rules! impl_converter_big {
    ($type: tt, $tval: tt) => {
        impl EndianData<$tval> for $type {
            const SIZE: usize = size_of::<$tval>();

            #[inline(always)]
            fn value(&self) -> $tval {
                $tval::from_be(self.0)
            }

            #[inline(always)]
            fn from_value(value: $tval) -> Self {
                $type(value.to_be())
            }

            fn from_bytes(bytes: &[u8]) -> Option<Self> {
                let raw = bytes.get(..Self::SIZE)?.try_into().ok()?;
                Some($type::from_value($tval::from_be_bytes(raw)))
            }
        }

        impl $type {
            /// Bytes in memory order, ready to be stored as a property payload.
            #[inline(always)]
            pub fn to_bytes(self) -> [u8; size_of::<$tval>()] {
                self.value().to_be_bytes()
            }
        }
    };
}

/// Implement an [EndianData<T>] for a specific type, and explain the data in little endianess
macro_rules! impl_converter_little {
    ($type: tt, $tval: tt) => {
        impl EndianData<$tval> for $type {
            const SIZE: usize = size_of::<$tval>();

            #[inline(always)]
            fn value(&self) -> $tval {
                $tval::from_le(self.0)
            }

            #[inline(always)]
            fn from_value(value: $tval) -> Self {
                $type(value.to_le())
            }

            fn from_bytes(bytes: &[u8]) -> Option<Self> {
                let raw = bytes.get(..Self::SIZE)?.try_into().ok()?;
                Some($type::from_value($tval::from_le_bytes(raw)))
            }
        }

        impl $type {
            /// Bytes in memory order.
            #[inline(always)]
            pub fn to_bytes(self) -> [u8; size_of::<$tval>()] {
                self.value().to_le_bytes()
            }
        }
    };
}

impl_converter_big!(BigEndian16, u16);
impl_converter_big!(BigEndian32, u32);
impl_converter_big!(BigEndian64, u64);

impl_converter_little!(LittleEndian16, u16);
impl_converter_little!(LittleEndian32, u32);

/// Decode a run of big endian cells, ignoring a trailing partial cell.
pub fn be32_cells(bytes: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bytes
        .chunks_exact(BigEndian32::SIZE)
        .filter_map(BigEndian32::from_bytes)
        .map(|cell| cell.value())
}

//! Offset arithmetic for packed binary formats.

/// Rounding an offset to a multiple of an alignment.
pub trait AlignableTo {
    fn align_up(self, align: Self) -> Self;
    fn align_down(self, align: Self) -> Self;
}

macro_rules! impl_alignable {
    ($($ty:ty),*) => {$(
        impl AlignableTo for $ty {
            fn align_up(self, align: $ty) -> $ty {
                match self % align {
                    0 => self,
                    rem => self + (align - rem),
                }
            }
            fn align_down(self, align: $ty) -> $ty {
                self - self % align
            }
        }
    )*};
}

impl_alignable!(u32, u64, usize);

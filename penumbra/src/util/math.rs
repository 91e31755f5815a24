//! Math utilites.

use num_traits::PrimInt;

/// Performs integer division between a and b rounding up, instead of down
pub fn round_up_div<T: PrimInt>(a: T, b: T) -> T {
    (a + (b - T::one())) / b
}

/// Smallest `p` such that `1 << p >= value`. Zero and one both map to zero.
pub fn ceil_log2<T: PrimInt>(value: T) -> u32 {
    if value <= T::one() {
        return 0;
    }
    let bits = T::zero().count_zeros();
    bits - (value - T::one()).leading_zeros()
}

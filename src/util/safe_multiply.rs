//! Overflow-checked arithmetic used when computing plane/strip byte sizes
//! from attacker-controlled dimension and sample-count tags.

use crate::error::{ArgsError, TiffError};

/// Multiply two `u32`s, returning [`TiffError::Args(ArgsError::IntegerOverflow)`]
/// instead of wrapping or panicking. TIFF dimension tags are nominally 32-bit
/// but a corrupt or hostile file can still set them so a naive multiply (e.g.
/// `width * height * samples_per_pixel`) overflows.
///
/// Per §4.8, the result itself must fit in a signed 32-bit array index
/// (`<= i32::MAX`), not merely avoid overflowing the `u64` accumulator -
/// callers use this to size a single contiguous byte array.
pub fn safe_multiply_u32(values: &[u32]) -> Result<u64, TiffError> {
    let mut acc: u64 = 1;
    for &v in values {
        acc = acc
            .checked_mul(v as u64)
            .ok_or(TiffError::Args(ArgsError::IntegerOverflow))?;
    }
    if acc > i32::MAX as u64 {
        return Err(TiffError::Args(ArgsError::IntegerOverflow));
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplies_in_order() {
        assert_eq!(safe_multiply_u32(&[2, 3, 4]).unwrap(), 24);
    }

    #[test]
    fn empty_product_is_one() {
        assert_eq!(safe_multiply_u32(&[]).unwrap(), 1);
    }

    #[test]
    fn detects_overflow() {
        let err = safe_multiply_u32(&[u32::MAX, u32::MAX, u32::MAX]).unwrap_err();
        assert!(matches!(err, TiffError::Args(ArgsError::IntegerOverflow)));
    }

    #[test]
    fn detects_overflow_past_i32_max_even_when_u64_accumulator_would_fit() {
        // 100_000 * 100_000 = 10^10, well within u64 but past i32::MAX.
        let err = safe_multiply_u32(&[100_000, 100_000]).unwrap_err();
        assert!(matches!(err, TiffError::Args(ArgsError::IntegerOverflow)));
    }

    #[test]
    fn allows_products_up_to_i32_max() {
        assert_eq!(safe_multiply_u32(&[i32::MAX as u32]).unwrap(), i32::MAX as u64);
    }
}

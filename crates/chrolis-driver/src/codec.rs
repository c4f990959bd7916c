//! Packing of the six LED enable flags into the aggregate "State" integer.
//!
//! Bit `i` of the mask is LED `i`'s enable flag. The mapping is a bijection between
//! `[bool; NUM_LEDS]` and `0..=MAX_MASK`.

/// Number of LED channels on a CHROLIS.
pub const NUM_LEDS: usize = 6;

/// Largest valid aggregate mask (`2^NUM_LEDS - 1`).
pub const MAX_MASK: u8 = (1 << NUM_LEDS) - 1;

/// Enable flags for every LED, index 0 first.
pub type LedStates = [bool; NUM_LEDS];

/// Pack per-LED enable flags into a mask.
pub fn encode(states: &LedStates) -> u8 {
    states
        .iter()
        .enumerate()
        .fold(0u8, |mask, (i, &on)| mask | (u8::from(on) << i))
}

/// Unpack a mask into per-LED enable flags. Bits above `NUM_LEDS` are ignored.
pub fn decode(mask: u8) -> LedStates {
    std::array::from_fn(|i| mask & (1 << i) != 0)
}

/// Check that an aggregate value from the host lies in `0..=MAX_MASK`.
pub fn mask_in_range(value: i64) -> Option<u8> {
    u8::try_from(value).ok().filter(|mask| *mask <= MAX_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_every_mask() {
        for mask in 0..=MAX_MASK {
            assert_eq!(encode(&decode(mask)), mask);
        }
    }

    #[test]
    fn test_decode_encode_every_vector() {
        for mask in 0..=MAX_MASK {
            let states = decode(mask);
            assert_eq!(decode(encode(&states)), states);
        }
    }

    #[test]
    fn test_bit_order() {
        assert_eq!(encode(&[true, false, false, false, false, false]), 0b000001);
        assert_eq!(encode(&[false, false, true, false, false, true]), 0b100100);
        assert_eq!(decode(0b000100), [false, false, true, false, false, false]);
    }

    #[test]
    fn test_mask_range() {
        assert_eq!(mask_in_range(0), Some(0));
        assert_eq!(mask_in_range(63), Some(63));
        assert_eq!(mask_in_range(64), None);
        assert_eq!(mask_in_range(-1), None);
        assert_eq!(mask_in_range(i64::MAX), None);
    }
}

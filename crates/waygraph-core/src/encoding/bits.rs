//! Bit manipulation over blocks of `u32` words
//!
//! A flag block is a little sequence of words; bit `i` of the block is bit
//! `i % 32` of word `i / 32`. Values up to 32 bits wide may span two words.

/// Block bit that marks edges whose creation direction is stored B→A
pub const REVERSE_BIT: u32 = 0;

fn mask(width: u32) -> u64 {
    debug_assert!(width <= 32);
    (1u64 << width) - 1
}

/// Read `width` bits starting at bit `offset`
pub fn read_bits(words: &[u32], offset: u32, width: u32) -> u64 {
    let index = (offset / 32) as usize;
    let shift = offset % 32;
    let mut value = (words[index] as u64) >> shift;
    if shift + width > 32 {
        value |= (words[index + 1] as u64) << (32 - shift);
    }
    value & mask(width)
}

/// Write the low `width` bits of `value` at bit `offset`
pub fn write_bits(words: &mut [u32], offset: u32, width: u32, value: u64) {
    let value = value & mask(width);
    let index = (offset / 32) as usize;
    let shift = offset % 32;
    let low_width = width.min(32 - shift);
    let low_mask = (mask(low_width) << shift) as u32;
    words[index] = (words[index] & !low_mask) | (((value << shift) as u32) & low_mask);
    if low_width < width {
        let high_width = width - low_width;
        let high_mask = mask(high_width) as u32;
        words[index + 1] = (words[index + 1] & !high_mask) | ((value >> low_width) as u32);
    }
}

/// Whether a field should be read from its backward slot
///
/// `traversed_from_b` says the handle walks the record from node B to node A;
/// `stored_reverse_bit` says the record's creation direction is B→A. Reading
/// with both set, or neither, yields the forward slot.
pub fn effective_reverse(traversed_from_b: bool, stored_reverse_bit: bool) -> bool {
    traversed_from_b ^ stored_reverse_bit
}

/// Stored reverse bit of a flag block
pub fn reverse_bit(words: &[u32]) -> bool {
    read_bits(words, REVERSE_BIT, 1) == 1
}

/// Set the stored reverse bit of a flag block
pub fn set_reverse_bit(words: &mut [u32], reversed: bool) {
    write_bits(words, REVERSE_BIT, 1, reversed as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_word() {
        let mut words = [0u32; 1];
        write_bits(&mut words, 3, 5, 0b10110);
        assert_eq!(words[0], 0b10110 << 3);
        assert_eq!(read_bits(&words, 3, 5), 0b10110);
        // neighbours untouched
        write_bits(&mut words, 0, 3, 0b111);
        assert_eq!(read_bits(&words, 3, 5), 0b10110);
        assert_eq!(read_bits(&words, 0, 3), 0b111);
    }

    #[test]
    fn test_spanning_two_words() {
        let mut words = [0u32; 2];
        write_bits(&mut words, 28, 10, 0x3FF);
        assert_eq!(words[0], 0xF000_0000);
        assert_eq!(words[1], 0x3F);
        assert_eq!(read_bits(&words, 28, 10), 0x3FF);

        write_bits(&mut words, 28, 10, 0x155);
        assert_eq!(read_bits(&words, 28, 10), 0x155);
    }

    #[test]
    fn test_full_word() {
        let mut words = [0u32; 2];
        write_bits(&mut words, 32, 32, u32::MAX as u64);
        assert_eq!(words, [0, u32::MAX]);
        assert_eq!(read_bits(&words, 32, 32), u32::MAX as u64);
    }

    #[test]
    fn test_value_is_masked() {
        let mut words = [0u32; 1];
        write_bits(&mut words, 4, 2, 0xFF);
        assert_eq!(words[0], 0b11 << 4);
    }

    #[test]
    fn test_effective_reverse_is_xor() {
        assert!(!effective_reverse(false, false));
        assert!(effective_reverse(true, false));
        assert!(effective_reverse(false, true));
        assert!(!effective_reverse(true, true));
    }

    #[test]
    fn test_reverse_bit() {
        let mut words = [0xFFFF_FFF0u32];
        assert!(!reverse_bit(&words));
        set_reverse_bit(&mut words, true);
        assert!(reverse_bit(&words));
        assert_eq!(words[0], 0xFFFF_FFF1);
    }

    proptest! {
        #[test]
        fn prop_write_read(offset in 0u32..64, width in 1u32..=32, value in any::<u32>(), noise in any::<[u32; 3]>()) {
            let mut words = noise;
            let before = words;
            write_bits(&mut words, offset, width, value as u64);
            prop_assert_eq!(read_bits(&words, offset, width), value as u64 & mask(width));
            // bits outside the range are unchanged
            for bit in 0..96u32 {
                if bit < offset || bit >= offset + width {
                    prop_assert_eq!(read_bits(&words, bit, 1), read_bits(&before, bit, 1));
                }
            }
        }
    }
}

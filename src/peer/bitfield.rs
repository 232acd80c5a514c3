//! Bit-packed piece availability. Bit `j` of byte `i`, counted from the
//! most significant bit, stands for piece `i * 8 + j`.

/// Expand a bitfield into the piece indices it marks, in ascending order.
/// Spare bits past the real piece count come through too; callers that
/// look pieces up by index simply find nothing for them.
pub fn decode_bitfield(bitfield: &[u8]) -> Vec<u32> {
    let mut indices = Vec::new();

    for (byte_index, byte) in bitfield.iter().enumerate() {
        for bit in 0..8u32 {
            if byte & (0x80 >> bit) != 0 {
                indices.push(byte_index as u32 * 8 + bit);
            }
        }
    }

    indices
}

/// Pack indices into a bitfield sized for `piece_count` pieces. Indices at
/// or beyond `piece_count` are dropped.
pub fn encode_bitfield<I>(indices: I, piece_count: usize) -> Vec<u8>
where
    I: IntoIterator<Item = u32>,
{
    let mut bitfield = vec![0u8; piece_count.div_ceil(8)];

    for index in indices {
        let index = index as usize;
        if index < piece_count {
            bitfield[index / 8] |= 0x80 >> (index % 8);
        }
    }

    bitfield
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msb_first() {
        assert_eq!(decode_bitfield(&[0b1000_0001, 0b0100_0000]), vec![0, 7, 9]);
    }

    #[test]
    fn test_round_trip_preserves_set() {
        let indices = vec![0, 3, 8, 12, 19];
        let bitfield = encode_bitfield(indices.clone(), 20);

        assert_eq!(bitfield.len(), 3);
        assert_eq!(decode_bitfield(&bitfield), indices);
    }

    #[test]
    fn test_spare_bits() {
        // 10 pieces need two bytes; the low six bits of the second are padding
        assert_eq!(encode_bitfield([9, 10, 15], 10), vec![0, 0b0100_0000]);
        assert_eq!(decode_bitfield(&[0, 0b0100_0001]), vec![9, 15]);
    }
}

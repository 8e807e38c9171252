/// number of bytes required to pack `count` bits
pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize).div_ceil(8)
}

/// pack bits LSB first, as Modbus does for coils and discrete inputs
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// unpack `count` bits LSB first, returning `None` if `bytes` is too short
pub(crate) fn unpack_bits(bytes: &[u8], count: u16) -> Option<Vec<bool>> {
    (0..count as usize)
        .map(|i| bytes.get(i / 8).map(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_bytes_for_bits() {
        assert_eq!(num_bytes_for_bits(7), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(15), 2);
        assert_eq!(num_bytes_for_bits(16), 2);
        assert_eq!(num_bytes_for_bits(17), 3);
        assert_eq!(num_bytes_for_bits(0xFFFF), 8192);
    }

    #[test]
    fn packs_least_significant_bit_first() {
        let bits = [true, false, true, true, false, false, true, true, true, true];
        assert_eq!(pack_bits(&bits), vec![0xCD, 0x03]);
        assert_eq!(unpack_bits(&[0xCD, 0x03], 10).unwrap(), bits.to_vec());
    }

    #[test]
    fn unpack_fails_when_bytes_are_missing() {
        assert_eq!(unpack_bits(&[0xFF], 9), None);
    }
}

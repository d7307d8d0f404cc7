//! CRC16 for Modbus RTU frames

/// Calculate CRC16 (init 0xFFFF, reflected polynomial 0xA001)
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `frame` in little-endian order
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16_modbus(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Check that the trailing two bytes are the CRC of everything before them
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    crc16_modbus(body) == u16::from_le_bytes([tail[0], tail[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_request_crc() {
        // Read 1 holding register at 0 from unit 1
        let mut frame = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        append_crc(&mut frame);
        assert_eq!(&frame[6..], &[0x84, 0x0A]);
        assert!(verify_crc(&frame));
    }

    #[test]
    fn test_crc_self_consistent() {
        let mut seed: u32 = 0x1234_5678;
        for len in 1..64usize {
            let mut frame: Vec<u8> = (0..len)
                .map(|_| {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                    (seed >> 16) as u8
                })
                .collect();
            append_crc(&mut frame);
            assert!(verify_crc(&frame), "length {len}");
        }
    }

    #[test]
    fn test_single_bit_flip_is_detected() {
        let body = [0x01u8, 0x03, 0x04, 0x00, 0x0A, 0x01, 0x2C];
        let reference = crc16_modbus(&body);
        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut flipped = body;
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16_modbus(&flipped), reference, "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn test_verify_rejects_short_or_corrupt() {
        assert!(!verify_crc(&[0x01, 0x03]));
        let mut frame = vec![0x01, 0x03, 0x02, 0x00, 0x2A];
        append_crc(&mut frame);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(!verify_crc(&frame));
    }
}

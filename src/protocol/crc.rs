//! Modbus CRC16 (polynomial 0xA001 reflected, initial value 0xFFFF).

/// Computes the CRC16 of `data` as used by Modbus-RTU frames.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// The two checksum bytes as they appear on the wire, low byte first.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}

/// Checks that the last two bytes of `frame` are the checksum of everything
/// before them. Frames shorter than a checksum never verify.
pub fn verify(frame: &[u8]) -> bool {
    match frame.len().checked_sub(2) {
        Some(split) => {
            let (body, trailer) = frame.split_at(split);
            checksum(body)[..] == *trailer
        }
        None => false,
    }
}

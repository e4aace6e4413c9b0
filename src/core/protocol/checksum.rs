//! Checksum algorithms used by the GNSS framers
//!
//! NMEA XOR, UBX 8-bit Fletcher, CRC-24Q (RTCM v3), CRC-16/CCITT-FALSE (Asv),
//! CRC-16/XMODEM (SBF) and the unfinalised CRC-32 used by ComNav logs.

/// XOR of all bytes (NMEA-0183)
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// UBX 8-bit Fletcher checksum, returned as `(ck_a, ck_b)`
pub fn ubx_checksum(data: &[u8]) -> (u8, u8) {
    data.iter().fold((0u8, 0u8), |(a, b), &byte| {
        let a = a.wrapping_add(byte);
        (a, b.wrapping_add(a))
    })
}

/// CRC-24Q (RTCM v3)
/// Polynomial: 0x1864CFB, Init: 0x000000, RefIn: false, RefOut: false
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= 0x0186_4CFB;
            }
        }
    }

    crc & 0x00FF_FFFF
}

/// CRC-16/CCITT-FALSE (Asv)
/// Polynomial: 0x1021, Init: 0xFFFF, RefIn: false, RefOut: false
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    crc16_1021(0xFFFF, data)
}

/// CRC-16/XMODEM (SBF)
/// Polynomial: 0x1021, Init: 0x0000, RefIn: false, RefOut: false
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    crc16_1021(0x0000, data)
}

fn crc16_1021(init: u16, data: &[u8]) -> u16 {
    let mut crc = init;

    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

// Reflected 0x04C11DB7
const CRC32_TABLE: [u32; 256] = crc32_table();

fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = CRC32_TABLE[index] ^ (crc >> 8);
    }
    crc
}

/// CRC-32 with zero init and no final XOR (ComNav binary and ASCII logs)
/// Polynomial: 0x04C11DB7, RefIn: true, RefOut: true
pub fn crc32_comnav(data: &[u8]) -> u32 {
    crc32_update(0, data)
}

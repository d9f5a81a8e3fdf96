use base64::prelude::{Engine, BASE64_STANDARD};

const ARMOR_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";
const ARMOR_FOOTER: &str = "-----END PGP SIGNATURE-----";
const LINE_WIDTH: usize = 64;

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

/// OpenPGP ascii armor for a detached signature packet. No trailing newline.
pub fn armor_signature(signature: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(signature);
    let checksum = crc24(signature).to_be_bytes();

    let mut armored = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 96);
    armored.push_str(ARMOR_HEADER);
    armored.push_str("\n\n");
    // base64 output is ascii, so byte chunks are valid str slices.
    for line in encoded.as_bytes().chunks(LINE_WIDTH) {
        armored.push_str(&String::from_utf8_lossy(line));
        armored.push('\n');
    }
    armored.push('=');
    armored.push_str(&BASE64_STANDARD.encode(&checksum[1..]));
    armored.push('\n');
    armored.push_str(ARMOR_FOOTER);
    armored
}

fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for byte in data {
        crc ^= u32::from(*byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

//! Per-bundle obfuscation layer.
//!
//! Downloaded bundles carry a 4-byte magic prefix: `20 00 00 00` is a bare
//! wrapper, `10 00 00 00` additionally XORs the first 128 payload bytes
//! with a repeating `FF FF FF FF FF 00 00 00` pattern. Anything else passes
//! through untouched.

const MAGIC_PLAIN: [u8; 4] = [0x20, 0x00, 0x00, 0x00];
const MAGIC_MASKED: [u8; 4] = [0x10, 0x00, 0x00, 0x00];

const MASK_LEN: usize = 128;

fn xor_leading_block(data: &mut [u8]) {
    for (i, b) in data.iter_mut().take(MASK_LEN).enumerate() {
        if i % 8 < 5 {
            *b ^= 0xFF;
        }
    }
}

/// Strip the obfuscation wrapper from a downloaded bundle.
pub fn deobfuscate(data: &[u8]) -> Vec<u8> {
    if data.len() >= 4 && data[..4] == MAGIC_PLAIN {
        return data[4..].to_vec();
    }
    if data.len() >= 4 && data[..4] == MAGIC_MASKED {
        let mut body = data[4..].to_vec();
        if body.len() >= MASK_LEN {
            xor_leading_block(&mut body);
        }
        return body;
    }
    data.to_vec()
}

/// Apply the masked wrapper. Payloads shorter than the mask block stay
/// unwrapped, mirroring the game client.
pub fn obfuscate(data: &[u8]) -> Vec<u8> {
    if data.len() < MASK_LEN {
        return data.to_vec();
    }

    let mut out = Vec::with_capacity(data.len() + 4);
    out.extend_from_slice(&MAGIC_MASKED);
    out.extend_from_slice(data);
    xor_leading_block(&mut out[4..]);
    out
}

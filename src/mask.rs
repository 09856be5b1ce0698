//! Payload masking with a prepared key
//!
//! The 4-byte wire key is converted once into a native-endian word so the
//! hot path can XOR a machine word at a time. Streaming callers thread the
//! returned key through successive calls; it is rotated by the number of
//! bytes already masked so byte `i` of a frame payload is always XORed
//! with `raw_key[i % 4]` no matter how the bytes were batched.
//!
//! The `strict-masking` feature forces the byte-at-a-time path with
//! identical observable output.

use bytes::BytesMut;

/// Source of masking keys for outbound client frames
///
/// RFC 6455 requires the key to be unpredictable to the receiving
/// intermediaries, so implementations must draw from a CSPRNG.
pub trait MaskKeySource {
    fn next_mask_key(&mut self) -> u32;
}

/// Default mask key source backed by the OS-seeded thread-local CSPRNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsMaskSource;

impl MaskKeySource for OsMaskSource {
    #[inline]
    fn next_mask_key(&mut self) -> u32 {
        rand::random()
    }
}

/// Convert a wire-format masking key into prepared (word) form
#[inline]
pub fn prepare_masking_key(raw: [u8; 4]) -> u32 {
    u32::from_ne_bytes(raw)
}

/// Rotate a prepared key past `advanced` masked bytes
#[inline]
fn rotate_key(key: u32, advanced: usize) -> u32 {
    let bits = 8 * (advanced as u32 & 3);
    if bits == 0 {
        return key;
    }
    #[cfg(target_endian = "little")]
    {
        key.rotate_right(bits)
    }
    #[cfg(target_endian = "big")]
    {
        key.rotate_left(bits)
    }
}

/// XOR a buffer with the repeating 4-byte key, one byte at a time
#[inline]
pub fn byte_mask(buf: &mut [u8], key: u32) {
    let kb = key.to_ne_bytes();
    for (i, b) in buf.iter_mut().enumerate() {
        *b ^= kb[i & 3];
    }
}

/// Mask or unmask a buffer in place, continuing a frame's key stream
///
/// Returns the key rotated for the next call. XOR is an involution, so
/// the same function serves both directions.
#[cfg(not(feature = "strict-masking"))]
pub fn mask_stream(buf: &mut [u8], key: u32) -> u32 {
    let key64 = (key as u64) << 32 | key as u64;

    let mut chunks = buf.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let masked = u64::from_ne_bytes(word) ^ key64;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    let tail = chunks.into_remainder();
    let kb = key.to_ne_bytes();
    for (i, b) in tail.iter_mut().enumerate() {
        *b ^= kb[i & 3];
    }

    rotate_key(key, buf.len())
}

/// Mask or unmask a buffer in place, continuing a frame's key stream
#[cfg(feature = "strict-masking")]
pub fn mask_stream(buf: &mut [u8], key: u32) -> u32 {
    byte_mask(buf, key);
    rotate_key(key, buf.len())
}

/// Append a masked copy of a contiguous payload to `out`
///
/// Used by the outbound builder when the whole payload is available at
/// once; the key needs no rotation because the frame ends here.
pub fn mask_exact(src: &[u8], out: &mut BytesMut, key: u32) {
    let start = out.len();
    out.extend_from_slice(src);
    mask_stream(&mut out[start..], key);
}

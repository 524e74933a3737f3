//! Little-endian base-128 unsigned integer encoding.
//!
//! Every multi-byte field in the trace stream is a LEB128 varint: seven
//! payload bits per byte, high bit set on all but the last byte. A u64
//! never needs more than [`MAX_VARINT_BYTES`] bytes.

/// Maximum encoded size of a u64.
pub const MAX_VARINT_BYTES: usize = 10;

/// Append `v` to `buf` in LEB128.
pub fn append_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push(0x80 | v as u8);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode one varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// input is truncated or longer than [`MAX_VARINT_BYTES`].
pub fn read_uvarint(data: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in data.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return None;
        }
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((v, i + 1));
        }
        shift += 7;
    }
    None
}

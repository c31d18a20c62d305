use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha8Legacy;

use crate::bits::slice_u64;
use crate::constants::K_EXTRA_BITS;

/// Builds the F1 keystream cipher for a given plot id: key = `0x01 || plot_id[0..31]`,
/// nonce/IV all zero. Only the first 31 bytes of the 32-byte plot id feed the
/// key; this is a stipulated property of the primitive, not an oversight.
fn build_cipher(plot_id: &[u8; 32]) -> ChaCha8Legacy {
  let mut key = [0u8; 32];
  key[0] = 0x01;
  key[1..32].copy_from_slice(&plot_id[0..31]);
  ChaCha8Legacy::new(&key.into(), &[0u8; 8].into())
}

/// F1(k, plot_id, x) = the k+kExtraBits-bit value formed by taking bits
/// `[x*k, x*k+k)` of the ChaCha8 keystream (big-endian) and appending the top
/// `kExtraBits` bits of `x` itself.
pub fn f1(k: u32, plot_id: &[u8; 32], x: u64) -> u64 {
  let start_bit = x * k as u64;
  let bit_off = start_bit % 8;
  let byte_start = start_bit / 8;
  let nbytes = ((bit_off + k as u64 + 7) / 8) as usize;

  let mut buf = vec![0u8; nbytes];
  let mut cipher = build_cipher(plot_id);
  cipher.seek(byte_start);
  cipher.apply_keystream(&mut buf);

  let y_bits = slice_u64(&buf, bit_off, k);
  let extra = extra_bits(x, k);
  (y_bits << K_EXTRA_BITS) | extra
}

/// the top `kExtraBits` bits of a k-bit value `x`, left-padding with zeros
/// when `k < kExtraBits`.
fn extra_bits(x: u64, k: u32) -> u64 {
  let mask = (1u64 << K_EXTRA_BITS) - 1;
  if k >= K_EXTRA_BITS {
    (x >> (k - K_EXTRA_BITS)) & mask
  } else {
    (x << (K_EXTRA_BITS - k)) & mask
  }
}

/// Evaluates F1 over a contiguous range `[x_start, x_start + count)`, reusing
/// one keystream read instead of reseeking per value.
pub fn f1_batch(k: u32, plot_id: &[u8; 32], x_start: u64, count: u64) -> Vec<(u64, u64)> {
  if count == 0 {
    return Vec::new();
  }
  let first_bit = x_start * k as u64;
  let last_bit = (x_start + count) * k as u64;
  let byte_start = first_bit / 8;
  let byte_end = (last_bit + 7) / 8;
  let mut buf = vec![0u8; (byte_end - byte_start) as usize];

  let mut cipher = build_cipher(plot_id);
  cipher.seek(byte_start);
  cipher.apply_keystream(&mut buf);

  let mut out = Vec::with_capacity(count as usize);
  for i in 0..count {
    let x = x_start + i;
    let local_bit = x * k as u64 - byte_start * 8;
    let y_bits = slice_u64(&buf, local_bit, k);
    let y = (y_bits << K_EXTRA_BITS) | extra_bits(x, k);
    out.push((y, x));
  }
  out
}

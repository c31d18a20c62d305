use crate::bit_writer::BitWriter;
use crate::bits::slice_u64;
use crate::constants::{Bitlen, K_EXTRA_BITS, K_VECTOR_LENS};

/// A fixed-width bit string carried between tables as match metadata. Widths
/// never exceed 128 bits for the k range this implementation targets (k <=
/// 32 keeps the largest metadata field, `4k` bits at the table4/5 boundary,
/// within a u128); see DESIGN.md for the k>32 follow-up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
  pub value: u128,
  pub bits: Bitlen,
}

impl Metadata {
  pub fn new(value: u128, bits: Bitlen) -> Self {
    debug_assert!(bits <= 128);
    Self {
      value: truncate(value, bits),
      bits,
    }
  }

  pub fn empty() -> Self {
    Self { value: 0, bits: 0 }
  }
}

fn truncate(value: u128, bits: Bitlen) -> u128 {
  if bits == 0 {
    0
  } else if bits >= 128 {
    value
  } else {
    value & ((1u128 << bits) - 1)
  }
}

fn rotl(value: u128, amount: u32, width: Bitlen) -> u128 {
  if width == 0 {
    return 0;
  }
  let amount = amount % width;
  if amount == 0 {
    return truncate(value, width);
  }
  let left = truncate(value << amount, width);
  let right = value >> (width - amount);
  left | right
}

/// Width (in bits) of the metadata consumed when computing table `t`'s y/metadata.
pub fn input_metadata_bits(t: u32, k: u32) -> Bitlen {
  K_VECTOR_LENS[t as usize] * k
}

/// Width (in bits) of the metadata a table-`t` entry carries forward for the
/// table-`(t+1)` computation (0 for t=7, the sink table).
pub fn output_metadata_bits(t: u32, k: u32) -> Bitlen {
  if t >= 7 {
    0
  } else {
    K_VECTOR_LENS[(t + 1) as usize] * k
  }
}

/// Fx(t, k, y1, metadata_L, metadata_R) for t in 2..=7. `y1` carries
/// `k + kExtraBits` bits. Returns `(y', metadata_out)`; `metadata_out` is
/// `None` for t=7, the sink table.
pub fn fx(t: u32, k: u32, y1: u64, meta_l: Metadata, meta_r: Metadata) -> (u64, Option<Metadata>) {
  debug_assert!((2..=7).contains(&t));
  let in_width = input_metadata_bits(t, k);
  debug_assert_eq!(meta_l.bits, in_width);
  debug_assert_eq!(meta_r.bits, in_width);

  let mut writer = BitWriter::new();
  writer.write_uint(y1, k + K_EXTRA_BITS);
  writer.write_uint128(meta_l.value, in_width);
  writer.write_uint128(meta_r.value, in_width);
  let packed = writer.into_bytes();

  let digest = blake3::hash(&packed);
  let out_width = if t == 7 { k } else { k + K_EXTRA_BITS };
  let y_out = slice_u64(digest.as_bytes(), 0, out_width);

  if t == 7 {
    return (y_out, None);
  }

  let out_bits = output_metadata_bits(t, k);
  let metadata_out = match t {
    2 | 3 => {
      let mut mw = BitWriter::new();
      mw.write_uint128(meta_l.value, in_width);
      mw.write_uint128(meta_r.value, in_width);
      let bytes = mw.into_bytes();
      let value = crate::bits::slice_u128(&bytes, 0, out_bits);
      Metadata::new(value, out_bits)
    }
    4 => {
      let value = meta_l.value ^ rotl(meta_r.value, 16, in_width);
      Metadata::new(value, out_bits)
    }
    5 => {
      let sum = meta_l.value.wrapping_add(rotl(meta_r.value, 8, in_width));
      Metadata::new(truncate(sum, out_bits), out_bits)
    }
    6 => {
      let value = meta_l.value ^ rotl(meta_r.value, 4, in_width);
      Metadata::new(truncate(value, out_bits), out_bits)
    }
    _ => unreachable!(),
  };

  (y_out, Some(metadata_out))
}

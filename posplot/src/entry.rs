//! Fixed-layout entry encode/decode for every table and phase named in
//! SPEC_FULL.md §3. Every entry is represented on the wire as a big-endian
//! bit-packed byte string of a size fixed by `k` and the table/phase; these
//! helpers are the only place that layout is spelled out.

use crate::bit_writer::BitWriter;
use crate::bits::slice_u64;
use crate::constants::{Bitlen, K_EXTRA_BITS, K_OFFSET_SIZE, K_VECTOR_LENS};
use crate::fx::Metadata;

/// The 256-bit value extracted from a verified proof (glossary: Quality).
pub type Quality = [u8; 32];

fn ceil_bytes(bits: u64) -> usize {
  ((bits + 7) / 8) as usize
}

/// `pos`/`sort_key`/`new_pos` width used everywhere except table 1's `x`
/// (exactly k bits) and table 7's `y` (exactly k bits); see SPEC_FULL.md §9
/// ("Ambiguity to flag, not guess").
fn pos_width(k: u32) -> Bitlen {
  k + 1
}

/// Phase 1, table 1: `y (k+kExtraBits) | x (k)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct T1Entry {
  pub y: u64,
  pub x: u64,
}

impl T1Entry {
  pub fn size_bits(k: u32) -> Bitlen {
    k + K_EXTRA_BITS + k
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let mut w = BitWriter::with_capacity(Self::size_bytes(k));
    w.write_uint(self.y, k + K_EXTRA_BITS);
    w.write_uint(self.x, k);
    w.pad_to(Self::size_bytes(k));
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let y = slice_u64(bytes, 0, k + K_EXTRA_BITS);
    let x = slice_u64(bytes, (k + K_EXTRA_BITS) as u64, k);
    Self { y, x }
  }
}

/// Phase 1, tables 2..6: `y (k+kExtraBits) | pos (k+1) | offset (kOffsetSize)
/// | metadata (kVectorLens[t+1]·k)`. The metadata carried is the width table
/// `t+1`'s Fx evaluation will consume, matching `fx::output_metadata_bits`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MidEntry {
  pub y: u64,
  pub pos: u64,
  pub offset: u64,
  pub metadata: Metadata,
}

impl MidEntry {
  pub fn metadata_bits(t: u32, k: u32) -> Bitlen {
    K_VECTOR_LENS[(t + 1) as usize] * k
  }

  pub fn size_bits(t: u32, k: u32) -> Bitlen {
    (k + K_EXTRA_BITS) + pos_width(k) + K_OFFSET_SIZE + Self::metadata_bits(t, k)
  }

  pub fn size_bytes(t: u32, k: u32) -> usize {
    ceil_bytes(Self::size_bits(t, k) as u64)
  }

  pub fn encode(&self, t: u32, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(t, k);
    let mut w = BitWriter::with_capacity(sz);
    w.write_uint(self.y, k + K_EXTRA_BITS);
    w.write_uint(self.pos, pos_width(k));
    w.write_uint(self.offset, K_OFFSET_SIZE);
    w.write_uint128(self.metadata.value, Self::metadata_bits(t, k));
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], t: u32, k: u32) -> Self {
    let y_bits = k + K_EXTRA_BITS;
    let pos_bits = pos_width(k);
    let meta_bits = Self::metadata_bits(t, k);
    let y = slice_u64(bytes, 0, y_bits);
    let pos = slice_u64(bytes, y_bits as u64, pos_bits);
    let offset = slice_u64(bytes, (y_bits + pos_bits) as u64, K_OFFSET_SIZE);
    let meta_value = crate::bits::slice_u128(
      bytes,
      (y_bits + pos_bits + K_OFFSET_SIZE) as u64,
      meta_bits,
    );
    Self {
      y,
      pos,
      offset,
      metadata: Metadata::new(meta_value, meta_bits),
    }
  }
}

/// Phase 1, table 7: `y (k) | pos (k+1) | offset (kOffsetSize)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct T7PreEntry {
  pub y: u64,
  pub pos: u64,
  pub offset: u64,
}

impl T7PreEntry {
  pub fn size_bits(k: u32) -> Bitlen {
    k + pos_width(k) + K_OFFSET_SIZE
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(k);
    let mut w = BitWriter::with_capacity(sz);
    w.write_uint(self.y, k);
    w.write_uint(self.pos, pos_width(k));
    w.write_uint(self.offset, K_OFFSET_SIZE);
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let pos_bits = pos_width(k);
    let y = slice_u64(bytes, 0, k);
    let pos = slice_u64(bytes, k as u64, pos_bits);
    let offset = slice_u64(bytes, (k + pos_bits) as u64, K_OFFSET_SIZE);
    Self { y, pos, offset }
  }
}

/// After Phase 2, tables 2..6: `sort_key (k+1) | pos (k+1) | offset (kOffsetSize)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Phase2Entry {
  pub sort_key: u64,
  pub pos: u64,
  pub offset: u64,
}

impl Phase2Entry {
  pub fn size_bits(k: u32) -> Bitlen {
    pos_width(k) + pos_width(k) + K_OFFSET_SIZE
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(k);
    let mut w = BitWriter::with_capacity(sz);
    let pw = pos_width(k);
    w.write_uint(self.sort_key, pw);
    w.write_uint(self.pos, pw);
    w.write_uint(self.offset, K_OFFSET_SIZE);
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let pw = pos_width(k);
    let sort_key = slice_u64(bytes, 0, pw);
    let pos = slice_u64(bytes, pw as u64, pw);
    let offset = slice_u64(bytes, (2 * pw) as u64, K_OFFSET_SIZE);
    Self {
      sort_key,
      pos,
      offset,
    }
  }
}

/// Table 7 after Phase 2 (rewritten in place): `y (k) | new_pos (k+1) |
/// new_offset (kOffsetSize)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct T7Entry {
  pub y: u64,
  pub pos: u64,
  pub offset: u64,
}

impl T7Entry {
  pub fn size_bits(k: u32) -> Bitlen {
    k + pos_width(k) + K_OFFSET_SIZE
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(k);
    let mut w = BitWriter::with_capacity(sz);
    w.write_uint(self.y, k);
    w.write_uint(self.pos, pos_width(k));
    w.write_uint(self.offset, K_OFFSET_SIZE);
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let pos_bits = pos_width(k);
    let y = slice_u64(bytes, 0, k);
    let pos = slice_u64(bytes, k as u64, pos_bits);
    let offset = slice_u64(bytes, (k + pos_bits) as u64, K_OFFSET_SIZE);
    Self { y, pos, offset }
  }
}

/// After Phase 3 Pass 1: `line_point (2k bits) | sort_key (k+1)`. The
/// checkpoint alignment in §6 reserves a full `2k`-bit field even though the
/// value itself never exceeds `2k-1` significant bits (see DESIGN.md).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinePointEntry {
  pub line_point: u128,
  pub sort_key: u64,
}

impl LinePointEntry {
  pub fn size_bits(k: u32) -> Bitlen {
    2 * k + pos_width(k)
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(k);
    let mut w = BitWriter::with_capacity(sz);
    w.write_uint128(self.line_point, 2 * k);
    w.write_uint(self.sort_key, pos_width(k));
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let line_point = crate::bits::slice_u128(bytes, 0, 2 * k);
    let sort_key = slice_u64(bytes, (2 * k) as u64, pos_width(k));
    Self {
      line_point,
      sort_key,
    }
  }
}

/// The reorder stream Phase 3 writes for table `t+1`: `sort_key (k+1) |
/// new_pos (k+1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SortKeyPos {
  pub sort_key: u64,
  pub new_pos: u64,
}

impl SortKeyPos {
  pub fn size_bits(k: u32) -> Bitlen {
    2 * pos_width(k)
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(k);
    let pw = pos_width(k);
    let mut w = BitWriter::with_capacity(sz);
    w.write_uint(self.sort_key, pw);
    w.write_uint(self.new_pos, pw);
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let pw = pos_width(k);
    let sort_key = slice_u64(bytes, 0, pw);
    let new_pos = slice_u64(bytes, pw as u64, pw);
    Self { sort_key, new_pos }
  }
}

/// Table 7 after Phase 3 (§4.6): the `(pos, offset)` pair has collapsed into
/// a single pointer, since proving only ever needs one line-point lookup
/// into table 6's parks. `y (k) | new_pos (k+1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FinalT7Entry {
  pub y: u64,
  pub new_pos: u64,
}

impl FinalT7Entry {
  pub fn size_bits(k: u32) -> Bitlen {
    k + pos_width(k)
  }

  pub fn size_bytes(k: u32) -> usize {
    ceil_bytes(Self::size_bits(k) as u64)
  }

  pub fn encode(&self, k: u32) -> Vec<u8> {
    let sz = Self::size_bytes(k);
    let mut w = BitWriter::with_capacity(sz);
    w.write_uint(self.y, k);
    w.write_uint(self.new_pos, pos_width(k));
    w.pad_to(sz);
    w.into_bytes()
  }

  pub fn decode(bytes: &[u8], k: u32) -> Self {
    let y = slice_u64(bytes, 0, k);
    let new_pos = slice_u64(bytes, k as u64, pos_width(k));
    Self { y, new_pos }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_t1_entry_round_trip() {
    let k = 20;
    let e = T1Entry {
      y: (1 << (k + K_EXTRA_BITS)) - 1,
      x: (1 << k) - 3,
    };
    let bytes = e.encode(k);
    assert_eq!(bytes.len(), T1Entry::size_bytes(k));
    assert_eq!(T1Entry::decode(&bytes, k), e);
  }

  #[test]
  fn test_mid_entry_round_trip() {
    let k = 18;
    for t in 2..=6u32 {
      let meta_bits = MidEntry::metadata_bits(t, k);
      let e = MidEntry {
        y: (1 << (k + K_EXTRA_BITS)) - 5,
        pos: (1 << k) - 7,
        offset: 511,
        metadata: Metadata::new(0xABCDEF1234567890u128, meta_bits),
      };
      let bytes = e.encode(t, k);
      assert_eq!(bytes.len(), MidEntry::size_bytes(t, k));
      assert_eq!(MidEntry::decode(&bytes, t, k), e, "table {t}");
    }
  }

  #[test]
  fn test_t7_pre_entry_round_trip() {
    let k = 19;
    let e = T7PreEntry {
      y: (1 << k) - 2,
      pos: (1 << k) - 9,
      offset: 42,
    };
    let bytes = e.encode(k);
    assert_eq!(T7PreEntry::decode(&bytes, k), e);
  }

  #[test]
  fn test_phase2_entry_round_trip() {
    let k = 22;
    let e = Phase2Entry {
      sort_key: (1 << k) + 3,
      pos: (1 << k) - 1,
      offset: 777,
    };
    let bytes = e.encode(k);
    assert_eq!(Phase2Entry::decode(&bytes, k), e);
  }

  #[test]
  fn test_line_point_entry_round_trip() {
    let k = 24;
    let e = LinePointEntry {
      line_point: (1u128 << (2 * k - 1)) + 12345,
      sort_key: (1 << k) - 4,
    };
    let bytes = e.encode(k);
    assert_eq!(LinePointEntry::decode(&bytes, k), e);
  }

  #[test]
  fn test_sort_key_pos_round_trip() {
    let k = 30;
    let e = SortKeyPos {
      sort_key: (1 << k) + 10,
      new_pos: (1 << k) - 6,
    };
    let bytes = e.encode(k);
    assert_eq!(SortKeyPos::decode(&bytes, k), e);
  }

  #[test]
  fn test_final_t7_entry_round_trip() {
    let k = 21;
    let e = FinalT7Entry {
      y: (1 << k) - 1,
      new_pos: (1 << k) + 2,
    };
    let bytes = e.encode(k);
    assert_eq!(bytes.len(), FinalT7Entry::size_bytes(k));
    assert_eq!(FinalT7Entry::decode(&bytes, k), e);
  }
}

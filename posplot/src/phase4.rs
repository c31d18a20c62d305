//! Checkpoint tables (C7, Phase 4, §4.7): packs table 7's final `(y,
//! new_pos)` rows into fixed-width P7 parks, then builds the C1/C2 sparse
//! y-checkpoint skip lists plus C3's per-stride delta-coded refinement — the
//! structures a challenge lookup walks (C1 → C2 → C3 → P7) before dropping
//! into table 6..1's own parks (see `prove.rs`).
//!
//! C3 is its own wire format, distinct from a P1..P6 park (`park.rs`):
//! deltas between consecutive table-7 `y` values within one
//! `kCheckpoint1Interval`-sized group, ANS-coded with `R = kC3R`, prefixed by
//! a 2-byte **big-endian** size field (P1..P6 parks use little-endian) and
//! no raw-entry fallback — a delta that doesn't fit the single-byte alphabet
//! is a hard `EncodingFatal`, not a degraded encoding.

use crate::ans::Symbol;
use crate::bit_writer::BitWriter;
use crate::bits::slice_u64;
use crate::constants::{
  Bitlen, K_C3_BITS_PER_ENTRY, K_C3_R, K_CHECKPOINT1_INTERVAL, K_CHECKPOINT2_INTERVAL,
  K_ENTRIES_PER_PARK,
};
use crate::entry::FinalT7Entry;
use crate::errors::{PlotError, PlotResult};
use crate::park::DeltaCodec;
use crate::phase3::Phase3Output;

pub struct Phase4Config {
  pub k: u32,
}

pub struct Phase4Output {
  pub k: u32,
  pub p7_parks: Vec<u8>,
  pub num_p7_parks: u64,
  /// Checkpoint-1 entries: one `y` per `kCheckpoint1Interval`-sized group,
  /// terminated by an all-zero `k`-bit entry (§4.7). Does not carry the
  /// `final_entries_written` count; that's the file-format layer's concern
  /// (`plot_file.rs`), not this algorithm's.
  pub c1: Vec<u8>,
  pub c2: Vec<u8>,
  pub c3: Vec<u8>,
  pub final_entries_written: u64,
}

/// Byte width of one fixed-size P7 park: `kEntriesPerPark` sequential
/// `(k+1)`-bit `new_pos` values, byte-aligned.
pub fn p7_park_size(k: u32) -> usize {
  (((k as u64 + 1) * K_ENTRIES_PER_PARK + 7) / 8) as usize
}

fn ceil_bytes_k(k: u32) -> usize {
  ((k as u64 + 7) / 8) as usize
}

/// `CalculateC3Size(k)`: below k=20 a C3 group is stored as one raw byte per
/// delta (no compression pays off at that scale); at or above it, the
/// table's own average-bits-per-entry bound sizes the fixed slot.
pub fn calculate_c3_size(k: u32) -> usize {
  let bits = if k < 20 {
    (8 * K_CHECKPOINT1_INTERVAL) as f64
  } else {
    K_C3_BITS_PER_ENTRY * K_CHECKPOINT1_INTERVAL as f64
  };
  (bits / 8.0).ceil() as usize
}

fn encode_p7_park(k: u32, chunk: &[FinalT7Entry]) -> Vec<u8> {
  let park_size = p7_park_size(k);
  let mut w = BitWriter::with_capacity(park_size);
  for e in chunk {
    w.write_uint(e.new_pos, k + 1);
  }
  w.pad_to(park_size);
  w.into_bytes()
}

/// Reads the `new_pos` stored at `index_in_park` of one decoded P7 park.
pub fn decode_p7_new_pos(k: u32, park: &[u8], index_in_park: u64) -> u64 {
  slice_u64(park, index_in_park * (k as u64 + 1), k + 1)
}

/// Byte-aligned `k`-bit values, one per checkpoint, terminated by one
/// all-zero `k`-bit entry (§4.7).
fn encode_checkpoint_table(k: u32, ys: &[u64]) -> Vec<u8> {
  let entry_bytes = ceil_bytes_k(k);
  let mut out = Vec::with_capacity((ys.len() + 1) * entry_bytes);
  for &y in ys {
    let mut w = BitWriter::with_capacity(entry_bytes);
    w.write_uint(y, k);
    w.pad_to(entry_bytes);
    out.extend_from_slice(&w.into_bytes());
  }
  out.extend(std::iter::repeat(0u8).take(entry_bytes));
  out
}

/// Inverse of [`encode_checkpoint_table`]'s non-terminator entries. The
/// entry count is derived from `bytes.len()`, not by scanning for the
/// sentinel: the caller already knows the byte region's exact extent from
/// the plot file's pointer table.
pub fn decode_checkpoint_table(k: u32, bytes: &[u8]) -> Vec<u64> {
  let entry_bytes = ceil_bytes_k(k);
  if entry_bytes == 0 {
    return Vec::new();
  }
  let total_entries = bytes.len() / entry_bytes;
  let real_count = total_entries.saturating_sub(1);
  (0..real_count)
    .map(|i| slice_u64(&bytes[i * entry_bytes..(i + 1) * entry_bytes], 0, k))
    .collect()
}

fn encode_c3_deltas(codec: &DeltaCodec, ys: &[u64]) -> PlotResult<Vec<u8>> {
  let mut symbols = Vec::with_capacity(ys.len().saturating_sub(1));
  for pair in ys.windows(2) {
    let delta = pair[1] - pair[0];
    if delta >= 255 {
      return Err(PlotError::encoding_fatal(format!(
        "C3 delta {delta} exceeds the single-byte alphabet (0..254)"
      )));
    }
    symbols.push(delta as Symbol);
  }
  let payload = codec.encode(&symbols);
  if payload.len() > u16::MAX as usize {
    return Err(PlotError::encoding_fatal(
      "C3 park payload overflows its 16-bit size field",
    ));
  }
  let mut out = Vec::with_capacity(2 + payload.len());
  out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
  out.extend_from_slice(&payload);
  Ok(out)
}

fn decode_c3_deltas(codec: &DeltaCodec, data: &[u8], n_deltas: usize) -> PlotResult<Vec<u64>> {
  if n_deltas == 0 {
    return Ok(Vec::new());
  }
  if data.len() < 2 {
    return Err(PlotError::invalid_value("C3 park too short for its size field"));
  }
  let size = u16::from_be_bytes([data[0], data[1]]) as usize;
  let payload = data
    .get(2..2 + size)
    .ok_or_else(|| PlotError::invalid_value("C3 park payload runs past the park's bytes"))?;
  let symbols = codec.decode(payload, n_deltas);
  if symbols.len() != n_deltas {
    return Err(PlotError::encoding_fatal(
      "C3 park payload decoded to the wrong symbol count",
    ));
  }
  Ok(symbols.into_iter().map(|s| s as u64).collect())
}

/// Decodes one C3 group back to its `group_len` `y` values, given the
/// checkpoint `y` (from C1) the group starts at.
pub fn decode_c3_group(
  codec: &DeltaCodec,
  park: &[u8],
  checkpoint_y: u64,
  group_len: usize,
) -> PlotResult<Vec<u64>> {
  if group_len == 0 {
    return Ok(Vec::new());
  }
  let deltas = decode_c3_deltas(codec, park, group_len - 1)?;
  let mut ys = Vec::with_capacity(group_len);
  ys.push(checkpoint_y);
  for d in deltas {
    ys.push(ys.last().copied().unwrap() + d);
  }
  Ok(ys)
}

pub fn run_phase4(phase3: &Phase3Output, cfg: &Phase4Config) -> PlotResult<Phase4Output> {
  let k = cfg.k;
  let table7 = &phase3.table7;
  let n = table7.len() as u64;

  let mut p7_parks = Vec::new();
  for chunk in table7.chunks(K_ENTRIES_PER_PARK as usize) {
    p7_parks.extend_from_slice(&encode_p7_park(k, chunk));
  }
  let num_p7_parks = (table7.len() as u64).div_ceil(K_ENTRIES_PER_PARK).max(if n == 0 { 0 } else { 1 });

  let c3_codec = DeltaCodec::new(K_C3_R)?;
  let c3_size = calculate_c3_size(k);
  let mut c1_ys = Vec::new();
  let mut c3 = Vec::new();
  for group in table7.chunks(K_CHECKPOINT1_INTERVAL as usize) {
    c1_ys.push(group[0].y);
    let ys: Vec<u64> = group.iter().map(|e| e.y).collect();
    let mut park = encode_c3_deltas(&c3_codec, &ys)?;
    if park.len() > c3_size {
      return Err(PlotError::encoding_fatal(format!(
        "C3 park of {} bytes overflows its fixed {c3_size}-byte slot",
        park.len()
      )));
    }
    park.resize(c3_size, 0);
    c3.extend_from_slice(&park);
  }
  let c1 = encode_checkpoint_table(k, &c1_ys);

  let c2_ys: Vec<u64> = c1_ys
    .iter()
    .step_by(K_CHECKPOINT2_INTERVAL as usize)
    .copied()
    .collect();
  let c2 = encode_checkpoint_table(k, &c2_ys);

  Ok(Phase4Output {
    k,
    p7_parks,
    num_p7_parks,
    c1,
    c2,
    c3,
    final_entries_written: n,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entry::FinalT7Entry;
  use crate::phase3::{Phase3Output, TableParks};

  fn tiny_phase3(n: u64, k: u32) -> Phase3Output {
    let table7: Vec<FinalT7Entry> = (0..n)
      .map(|i| FinalT7Entry {
        y: i * 3,
        new_pos: i,
      })
      .collect();
    Phase3Output {
      k,
      tables: (1..=6)
        .map(|t| TableParks {
          table_index: t,
          park_size: crate::park::calculate_park_size(k, t),
          parks: Vec::new(),
          entry_count: 0,
        })
        .collect(),
      table7,
    }
  }

  #[test]
  fn test_p7_park_size_matches_fixed_formula() {
    let k = 24;
    assert_eq!(p7_park_size(k), (((k as u64 + 1) * K_ENTRIES_PER_PARK + 7) / 8) as usize);
  }

  #[test]
  fn test_checkpoint_table_round_trip() {
    let k = 22;
    let ys = vec![5u64, 190, 4000, 900_000];
    let bytes = encode_checkpoint_table(k, &ys);
    assert_eq!(decode_checkpoint_table(k, &bytes), ys);
  }

  #[test]
  fn test_c3_group_round_trip() {
    let k = 18;
    let codec = DeltaCodec::new(K_C3_R).unwrap();
    let ys: Vec<u64> = (0..500u64).map(|i| i * 2).collect();
    let park = encode_c3_deltas(&codec, &ys).unwrap();
    let decoded = decode_c3_group(&codec, &park, ys[0], ys.len()).unwrap();
    assert_eq!(decoded, ys);
  }

  #[test]
  fn test_run_phase4_produces_consistent_parks() {
    let k = 16;
    let n = 25_000u64; // spans multiple C1/C3 groups and P7 parks
    let phase3 = tiny_phase3(n, k);
    let cfg = Phase4Config { k };
    let out = run_phase4(&phase3, &cfg).unwrap();

    assert_eq!(out.final_entries_written, n);
    let p7_size = p7_park_size(k);
    assert_eq!(out.p7_parks.len(), out.num_p7_parks as usize * p7_size);
    assert_eq!(out.num_p7_parks, n.div_ceil(K_ENTRIES_PER_PARK));

    let c3_size = calculate_c3_size(k);
    let expected_groups = n.div_ceil(K_CHECKPOINT1_INTERVAL);
    assert_eq!(out.c3.len(), expected_groups as usize * c3_size);

    // spot-check: the first P7 park's first entry is table7 index 0.
    let first_park = &out.p7_parks[0..p7_size];
    assert_eq!(decode_p7_new_pos(k, first_park, 0), 0);
  }
}

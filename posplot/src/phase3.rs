//! Compression (C6, Phase 3, §4.6): walks tables 1..6 bottom-up, collapsing
//! each surviving match's `(pos, pos+offset)` pair into a single line-point,
//! sorting those line-points, and ANS-coding the sorted run into fixed-size
//! parks. A table's line-point rank after sorting becomes its `new_pos`,
//! which the next table up uses in place of the raw positions Phase 2 left
//! it with — so each iteration both compresses one table and renumbers the
//! one above it. Table 7 never gets its own parks: its final form keeps
//! Phase 1's f7 order and just carries a single `new_pos` into table 6's
//! parks (see `entry::FinalT7Entry` and `phase4.hpp`'s `RunPhase4`).

use crate::constants::{Bitlen, K_ENTRIES_PER_PARK, K_R_VALUES};
use crate::entry::{FinalT7Entry, Phase2Entry, T7Entry};
use crate::errors::PlotResult;
use crate::line_point::{checked_square_to_line_point, square_to_line_point};
use crate::park::{calculate_park_size, encode_park, DeltaCodec};
use crate::phase2::Phase2Output;

pub struct Phase3Config {
  pub k: u32,
}

/// The concatenated, fixed-size parks for one table's compressed form.
pub struct TableParks {
  pub table_index: usize,
  pub park_size: usize,
  pub parks: Vec<u8>,
  pub entry_count: u64,
}

impl TableParks {
  pub fn num_parks(&self) -> u64 {
    if self.entry_count == 0 {
      0
    } else {
      (self.entry_count - 1) / K_ENTRIES_PER_PARK + 1
    }
  }

  pub fn park(&self, i: u64) -> &[u8] {
    let start = i as usize * self.park_size;
    &self.parks[start..start + self.park_size]
  }
}

pub struct Phase3Output {
  pub k: u32,
  /// Index 0 = table 1's parks .. index 5 = table 6's parks.
  pub tables: Vec<TableParks>,
  /// Table 7's final entries, still in ascending-f7 order.
  pub table7: Vec<FinalT7Entry>,
}

pub fn run_phase3(mut phase2: Phase2Output, cfg: &Phase3Config) -> PlotResult<Phase3Output> {
  let k = cfg.k;
  let mut tables = Vec::with_capacity(6);
  // `new_pos` table 2..6 each table was assigned the iteration it played
  // "right": empty only before table 1 (whose leaves are raw x values).
  let mut left_new_pos: Vec<u64> = Vec::new();

  for t in 1..=5u32 {
    let table_index = t as usize;
    let codec = DeltaCodec::new(K_R_VALUES[table_index - 1])?;

    // Table (t+1)'s Phase 2 stream, re-sorted by its original sort_key: this
    // recovers the ascending-original-index order in which Phase 2 assigned
    // it a dense survivor rank, before the sort manager reordered it by pos.
    let stream = &phase2.tables[(t - 1) as usize];
    let mut entries: Vec<Phase2Entry> = (0..stream.len())
      .map(|i| Phase2Entry::decode(stream.get(i), k))
      .collect();
    entries.sort_by_key(|e| e.sort_key);

    let mut line_points = Vec::with_capacity(entries.len());
    if t == 1 {
      for e in &entries {
        let x1 = phase2.table1.read_entry(e.pos)?.x;
        let x2 = phase2.table1.read_entry(e.pos + e.offset)?.x;
        line_points.push(checked_square_to_line_point(x1, x2, k)?);
      }
    } else {
      for e in &entries {
        let v1 = left_new_pos[e.pos as usize];
        let v2 = left_new_pos[(e.pos + e.offset) as usize];
        line_points.push(square_to_line_point(v1, v2));
      }
    }

    let (sorted_line_points, new_pos_of) = rank_by_line_point(&line_points);
    tables.push(build_table_parks(&codec, k, table_index, &sorted_line_points)?);
    left_new_pos = new_pos_of;
  }

  // Table 6 compresses against table 7, whose (pos, offset) pair still
  // points at table 6's dense rank as Phase 2 left it.
  let codec6 = DeltaCodec::new(K_R_VALUES[5])?;
  let t7_len = phase2.table7.len();
  let mut line_points = Vec::with_capacity(t7_len as usize);
  for i in 0..t7_len {
    let e = T7Entry::decode(phase2.table7.get(i), k);
    let v1 = left_new_pos[e.pos as usize];
    let v2 = left_new_pos[(e.pos + e.offset) as usize];
    line_points.push(square_to_line_point(v1, v2));
  }
  let (sorted_line_points, new_pos_of) = rank_by_line_point(&line_points);
  tables.push(build_table_parks(&codec6, k, 6, &sorted_line_points)?);

  let mut table7 = Vec::with_capacity(t7_len as usize);
  for i in 0..t7_len {
    let e = T7Entry::decode(phase2.table7.get(i), k);
    table7.push(FinalT7Entry {
      y: e.y,
      new_pos: new_pos_of[i as usize],
    });
  }

  Ok(Phase3Output { k, tables, table7 })
}

/// Sorts `line_points` ascending, returning the sorted run alongside, for
/// each original index, its rank in that sorted order (i.e. the `new_pos`
/// Phase 3 assigns that entry).
fn rank_by_line_point(line_points: &[u128]) -> (Vec<u128>, Vec<u64>) {
  let mut idx: Vec<usize> = (0..line_points.len()).collect();
  idx.sort_by_key(|&i| line_points[i]);
  let sorted: Vec<u128> = idx.iter().map(|&i| line_points[i]).collect();
  let mut new_pos_of = vec![0u64; idx.len()];
  for (rank, &orig_i) in idx.iter().enumerate() {
    new_pos_of[orig_i] = rank as u64;
  }
  (sorted, new_pos_of)
}

fn build_table_parks(
  codec: &DeltaCodec,
  k: u32,
  table_index: usize,
  sorted_line_points: &[u128],
) -> PlotResult<TableParks> {
  let park_size = calculate_park_size(k, table_index);
  let entry_count = sorted_line_points.len() as u64;
  let mut parks = Vec::with_capacity(park_size * sorted_line_points.len().div_ceil(K_ENTRIES_PER_PARK as usize).max(1));
  for chunk in sorted_line_points.chunks(K_ENTRIES_PER_PARK as usize) {
    parks.extend_from_slice(&encode_park(codec, k, table_index, chunk)?);
  }
  Ok(TableParks {
    table_index,
    park_size,
    parks,
    entry_count,
  })
}

/// Width, in bits, of the `new_pos` field Phase 3 hands to Phase 4 for table
/// 7: `k+1` bits, same as every other table's pos field (§9).
pub fn t7_new_pos_bits(k: u32) -> Bitlen {
  k + 1
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bitfield::{Bitfield, BitfieldIndex};
  use crate::disk::{BufferedDisk, RawFileDisk};
  use crate::entry::T1Entry;
  use crate::phase2::Table1View;
  use crate::sort_manager::SortedStream;

  /// A tiny, hand-built Phase 2 output: 8 table-1 leaves, a table-2 built
  /// from consecutive pairs, tables 3..6 that each forward every entry
  /// through unchanged (offset 0), and a table 7 that references every
  /// table-6 entry exactly once (at offset 0, paired with its neighbor).
  fn tiny_phase2(k: u32) -> (Phase2Output, Vec<u64>) {
    let xs: Vec<u64> = (0..8u64).collect();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t1.bin");
    let mut raw = RawFileDisk::create(&path).unwrap();
    for (i, &x) in xs.iter().enumerate() {
      let e = T1Entry { y: x, x };
      raw.write(i as u64 * T1Entry::size_bytes(k) as u64, &e.encode(k)).unwrap();
    }
    let buffered = BufferedDisk::new(raw, 1 << 16, 1 << 16);
    let field = Bitfield::all_set(xs.len() as u64);
    let index = BitfieldIndex::build(field);
    let table1 = Table1View::for_test(Some(buffered), index, T1Entry::size_bytes(k), k);

    // table2: pairs (0,1),(2,3),(4,5),(6,7), pos/offset into table1's dense
    // (identity) space.
    let pairs = [(0u64, 1u64), (2, 3), (4, 5), (6, 7)];
    let mut t2_bytes = Vec::new();
    for (i, &(l, r)) in pairs.iter().enumerate() {
      let e = Phase2Entry {
        sort_key: i as u64,
        pos: l,
        offset: r - l,
      };
      t2_bytes.extend_from_slice(&e.encode(k));
    }
    let table2 = SortedStream::from_sorted_bytes(t2_bytes, Phase2Entry::size_bytes(k));

    // tables 3..6 forward pairs (0,1),(2,3) unchanged (each consumes table
    // (t-1)'s 4 entries down to 2).
    let mut tables = vec![table2];
    let mut prev_len = 4u64;
    for _ in 3..=6u32 {
      let mut bytes = Vec::new();
      let mut i = 0u64;
      let mut sk = 0u64;
      while i + 1 < prev_len {
        let e = Phase2Entry {
          sort_key: sk,
          pos: i,
          offset: 1,
        };
        bytes.extend_from_slice(&e.encode(k));
        i += 2;
        sk += 1;
      }
      prev_len = sk;
      tables.push(SortedStream::from_sorted_bytes(bytes, Phase2Entry::size_bytes(k)));
    }

    // table7: one entry per surviving table6 pair.
    let mut t7_bytes = Vec::new();
    let mut i = 0u64;
    while i + 1 < prev_len {
      let e = T7Entry {
        y: i,
        pos: i,
        offset: 1,
      };
      t7_bytes.extend_from_slice(&e.encode(k));
      i += 2;
    }
    let table7 = SortedStream::from_sorted_bytes(t7_bytes, T7Entry::size_bytes(k));

    let out = Phase2Output {
      k,
      table1,
      tables,
      table7,
    };
    (out, xs)
  }

  #[test]
  fn test_phase3_compresses_every_table_and_preserves_table7_len() {
    let k = 8;
    let (phase2, _xs) = tiny_phase2(k);
    let table7_len = phase2.table7.len();
    let cfg = Phase3Config { k };
    let out = run_phase3(phase2, &cfg).unwrap();

    assert_eq!(out.tables.len(), 6);
    assert_eq!(out.table7.len(), table7_len as usize);
    for tp in &out.tables {
      assert_eq!(tp.parks.len() as u64, tp.num_parks() * tp.park_size as u64);
    }
  }

  #[test]
  fn test_phase3_table7_new_pos_is_a_permutation() {
    let k = 8;
    let (phase2, _xs) = tiny_phase2(k);
    let cfg = Phase3Config { k };
    let out = run_phase3(phase2, &cfg).unwrap();

    let mut seen: Vec<u64> = out.table7.iter().map(|e| e.new_pos).collect();
    seen.sort();
    let expected: Vec<u64> = (0..seen.len() as u64).collect();
    assert_eq!(seen, expected);
  }

  #[test]
  fn test_table1_park_decodes_back_to_expected_pairs() {
    let k = 8;
    let (phase2, xs) = tiny_phase2(k);
    let expected_pairs = [(0u64, 1u64), (2, 3), (4, 5), (6, 7)];
    let mut expected_lps: Vec<u128> = expected_pairs
      .iter()
      .map(|&(l, r)| square_to_line_point(xs[l as usize], xs[r as usize]))
      .collect();
    expected_lps.sort();

    let cfg = Phase3Config { k };
    let out = run_phase3(phase2, &cfg).unwrap();
    let table1_parks = &out.tables[0];
    let codec = DeltaCodec::new(K_R_VALUES[0]).unwrap();
    let decoded = crate::park::decode_park(&codec, k, table1_parks.park(0), table1_parks.entry_count as usize).unwrap();
    assert_eq!(decoded, expected_lps);
  }
}

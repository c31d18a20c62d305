//! Plot file header (§6): the byte-exact preamble every plot file starts
//! with, followed by the pointer table proving and verification walk from
//! (`prove.rs`) to locate each table's parks.
//!
//! Layout: `"Proof of Space Plot"` (19 bytes) | plot_id (32 bytes) | k (1
//! byte) | format_desc_len (2 BE) | format_desc | memo_len (2 BE) | memo |
//! table7_entries (8 BE) | 10×8-byte BE pointer table `[P1..P7, C1, C2,
//! C3]`. `table7_entries` is a deliberate addition beyond spec.md's header
//! (see DESIGN.md): it's the only way a reader can tell a checkpoint
//! table's last, possibly-partial group apart from a full one without
//! rescanning every P7 park, the same role pco's chunk metadata gives an
//! explicit value count instead of inferring it from page boundaries.

use crate::constants::MAGIC;
use crate::errors::{PlotError, PlotResult};

use better_io::BetterBufRead;

/// Number of 8-byte big-endian offsets in the pointer table: P1..P7, then
/// C1, C2, C3.
pub const NUM_TABLE_POINTERS: usize = 10;
pub const IDX_P7: usize = 6;
pub const IDX_C1: usize = 7;
pub const IDX_C2: usize = 8;
pub const IDX_C3: usize = 9;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlotHeader {
  pub plot_id: [u8; 32],
  pub k: u32,
  pub format_desc: Vec<u8>,
  pub memo: Vec<u8>,
  /// Total number of table 7 entries (= the plot's final proof count),
  /// carried so checkpoint lookups never need to guess a group's true size.
  pub table7_entries: u64,
}

impl PlotHeader {
  /// Encodes everything before the pointer table. `format_desc`/`memo` are
  /// assumed to already fit a 16-bit length prefix; `PlotterConfig::validate`
  /// is the place that precondition is enforced.
  pub fn encode_prefix(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(
      MAGIC.len() + 32 + 1 + 2 + self.format_desc.len() + 2 + self.memo.len() + 8,
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&self.plot_id);
    out.push(self.k as u8);
    out.extend_from_slice(&(self.format_desc.len() as u16).to_be_bytes());
    out.extend_from_slice(&self.format_desc);
    out.extend_from_slice(&(self.memo.len() as u16).to_be_bytes());
    out.extend_from_slice(&self.memo);
    out.extend_from_slice(&self.table7_entries.to_be_bytes());
    out
  }

  /// Total header length, prefix plus the fixed-size pointer table.
  pub fn header_size(&self) -> u64 {
    self.encode_prefix().len() as u64 + (NUM_TABLE_POINTERS * 8) as u64
  }
}

pub fn encode_table_pointers(offsets: &[u64; NUM_TABLE_POINTERS]) -> Vec<u8> {
  let mut out = Vec::with_capacity(NUM_TABLE_POINTERS * 8);
  for &offset in offsets {
    out.extend_from_slice(&offset.to_be_bytes());
  }
  out
}

pub fn decode_table_pointers(bytes: &[u8]) -> [u64; NUM_TABLE_POINTERS] {
  let mut offsets = [0u64; NUM_TABLE_POINTERS];
  for (i, slot) in offsets.iter_mut().enumerate() {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
    *slot = u64::from_be_bytes(buf);
  }
  offsets
}

/// Reads a header and its pointer table from a sequential source,
/// incrementally growing the reader's buffer as each variable-length field's
/// true size comes to light. Returns the header, its pointer table, and the
/// exact byte length consumed (the offset table's base is this, not a fixed
/// constant, since `format_desc`/`memo` are variable width).
pub fn read_header<R: BetterBufRead>(
  r: &mut R,
) -> PlotResult<(PlotHeader, [u64; NUM_TABLE_POINTERS], u64)> {
  let magic = take(r, MAGIC.len())?;
  if magic != MAGIC {
    return Err(PlotError::invalid_value(
      "plot file is missing the expected magic bytes",
    ));
  }

  let mut plot_id = [0u8; 32];
  plot_id.copy_from_slice(&take(r, 32)?);

  let k = take(r, 1)?[0] as u32;

  let format_desc_len = u16::from_be_bytes(take(r, 2)?.try_into().unwrap()) as usize;
  let format_desc = take(r, format_desc_len)?;

  let memo_len = u16::from_be_bytes(take(r, 2)?.try_into().unwrap()) as usize;
  let memo = take(r, memo_len)?;

  let table7_entries = u64::from_be_bytes(take(r, 8)?.try_into().unwrap());

  let pointer_bytes = take(r, NUM_TABLE_POINTERS * 8)?;
  let offsets = decode_table_pointers(&pointer_bytes);

  let header_size = (MAGIC.len()
    + 32
    + 1
    + 2
    + format_desc_len
    + 2
    + memo_len
    + 8
    + NUM_TABLE_POINTERS * 8) as u64;

  Ok((
    PlotHeader {
      plot_id,
      k,
      format_desc,
      memo,
      table7_entries,
    },
    offsets,
    header_size,
  ))
}

/// Pulls exactly `n` bytes out of `r`, growing its capacity first if the
/// implementation has a fixed one too small to serve the request.
fn take<R: BetterBufRead>(r: &mut R, n: usize) -> PlotResult<Vec<u8>> {
  if let Some(cap) = r.capacity() {
    if cap < n {
      r.resize_capacity(n);
    }
  }
  r.fill_or_eof(n).map_err(PlotError::from)?;
  if r.buffer().len() < n {
    return Err(PlotError::invalid_value(
      "plot file header ended before its declared fields were fully read",
    ));
  }
  let out = r.buffer()[..n].to_vec();
  r.consume(n);
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_header() -> PlotHeader {
    PlotHeader {
      plot_id: [7u8; 32],
      k: 25,
      format_desc: b"posplot-v1".to_vec(),
      memo: b"pool_pk|farmer_pk|local_sk".to_vec(),
      table7_entries: 123_456,
    }
  }

  fn sample_offsets() -> [u64; NUM_TABLE_POINTERS] {
    [100, 200, 300, 400, 500, 600, 700, 800, 900, 1000]
  }

  #[test]
  fn test_header_round_trip_from_slice() {
    let header = sample_header();
    let offsets = sample_offsets();
    let mut bytes = header.encode_prefix();
    bytes.extend_from_slice(&encode_table_pointers(&offsets));

    let (decoded, decoded_offsets, header_size) = read_header(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded, header);
    assert_eq!(decoded_offsets, offsets);
    assert_eq!(header_size, bytes.len() as u64);
    assert_eq!(header_size, header.header_size());
  }

  #[test]
  fn test_rejects_bad_magic() {
    let header = sample_header();
    let offsets = sample_offsets();
    let mut bytes = header.encode_prefix();
    bytes.extend_from_slice(&encode_table_pointers(&offsets));
    bytes[0] = b'X';

    let err = read_header(&mut bytes.as_slice()).unwrap_err();
    assert_eq!(err.kind, crate::errors::ErrorKind::InvalidValue);
  }

  #[test]
  fn test_rejects_truncated_header() {
    let header = sample_header();
    let offsets = sample_offsets();
    let mut bytes = header.encode_prefix();
    bytes.extend_from_slice(&encode_table_pointers(&offsets));
    bytes.truncate(bytes.len() - 1);

    assert!(read_header(&mut bytes.as_slice()).is_err());
  }

  #[test]
  fn test_empty_memo_and_format_desc_round_trip() {
    let header = PlotHeader {
      plot_id: [0u8; 32],
      k: 18,
      format_desc: Vec::new(),
      memo: Vec::new(),
      table7_entries: 0,
    };
    let offsets = [0u64; NUM_TABLE_POINTERS];
    let mut bytes = header.encode_prefix();
    bytes.extend_from_slice(&encode_table_pointers(&offsets));

    let (decoded, decoded_offsets, _) = read_header(&mut bytes.as_slice()).unwrap();
    assert_eq!(decoded, header);
    assert_eq!(decoded_offsets, offsets);
  }
}

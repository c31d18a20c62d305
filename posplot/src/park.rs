//! Fixed-size park encode/decode (C6/C7, §4.6, §6).
//!
//! A park is a checkpoint line-point followed by a run of successor
//! line-points, each stored as a delta against its predecessor. A delta
//! splits into an incompressible low-bit "stub" and a small, highly skewed
//! "small delta" symbol (< 256) that an rANS table shaped by the table's
//! `R` value compresses. Every park for a given `(k, table_index)` pair has
//! the same on-disk size, computed by [`calculate_park_size`], so parks can
//! be randomly accessed by index.

use crate::ans::{AnsState, Decoder, Encoder, Spec, Symbol};
use crate::bit_writer::BitWriter;
use crate::bits::{slice_u128, slice_u64, BitCursor};
use crate::constants::{
  Bitlen, K_ENTRIES_PER_PARK, K_MAX_AVERAGE_DELTA, K_MAX_AVERAGE_DELTA_TABLE1, K_STUB_MINUS_BITS,
};
use crate::errors::{PlotError, PlotResult};

/// top bit of the 2-byte little-endian `deltas_size` field (§6): set when the
/// payload is stored raw (one byte per delta) rather than ANS-coded, the
/// fallback for runs whose delta distribution doesn't fit the table's shape.
const RAW_FLAG: u16 = 0x8000;
const SIZE_FIELD_MASK: u16 = 0x7fff;

fn stub_bits(k: u32) -> Bitlen {
  k - K_STUB_MINUS_BITS
}

/// Byte width of a byte-aligned checkpoint line-point field (`2k` bits).
pub fn line_point_bytes(k: u32) -> usize {
  ((2 * k as u64 + 7) / 8) as usize
}

/// Byte width of a park's fixed stub region: `kEntriesPerPark − 1` stubs of
/// `k − kStubMinusBits` bits each, byte-aligned.
pub fn calculate_stubs_size(k: u32) -> usize {
  (((K_ENTRIES_PER_PARK - 1) * stub_bits(k) as u64 + 7) / 8) as usize
}

/// Byte budget reserved for the ANS-coded (or raw-fallback) deltas payload,
/// plus its 2-byte size header. Sized from the table's average-delta bound
/// so a pathological but in-bound input never overflows the fixed park.
pub fn calculate_max_deltas_size(table_index: usize) -> usize {
  let avg_delta = if table_index == 1 {
    K_MAX_AVERAGE_DELTA_TABLE1
  } else {
    K_MAX_AVERAGE_DELTA
  };
  ((K_ENTRIES_PER_PARK as f64 * avg_delta / 8.0).floor() as usize) + 2
}

/// `CalculateParkSize(k, table_index)`: the fixed byte size of every P1..P6
/// park for this table.
pub fn calculate_park_size(k: u32, table_index: usize) -> usize {
  line_point_bytes(k) + calculate_stubs_size(k) + calculate_max_deltas_size(table_index)
}

/// A table-based rANS codec for one table's delta alphabet, built once from
/// its `R` value (§4.9) and reused across every park that table emits.
pub struct DeltaCodec {
  encoder: Encoder,
  decoder: Decoder,
  size_log: Bitlen,
}

impl DeltaCodec {
  pub fn new(r: f64) -> PlotResult<Self> {
    let spec = Spec::from_r_value(r)?;
    let size_log = spec.size_log;
    Ok(Self {
      encoder: Encoder::new(&spec),
      decoder: Decoder::new(&spec),
      size_log,
    })
  }

  /// Encodes `symbols` LIFO, prefixing the output with the final encoder
  /// state (`size_log` bits) so the decoder knows where to start.
  pub fn encode(&self, symbols: &[Symbol]) -> Vec<u8> {
    if symbols.is_empty() {
      return Vec::new();
    }
    let mut state = self.encoder.default_state();
    let mut chunks = Vec::with_capacity(symbols.len());
    for &symbol in symbols.iter().rev() {
      let (new_state, bitlen) = self.encoder.encode(state, symbol);
      chunks.push((state, bitlen));
      state = new_state;
    }
    let mut writer = BitWriter::with_capacity(symbols.len());
    let table_size = 1u32 << self.size_log;
    writer.write_uint((state - table_size) as u64, self.size_log);
    for (word, bitlen) in chunks.into_iter().rev() {
      writer.write_uint(word as u64, bitlen);
    }
    writer.into_bytes()
  }

  /// Decodes exactly `count` symbols from `bytes`.
  pub fn decode(&self, bytes: &[u8], count: usize) -> Vec<Symbol> {
    if count == 0 {
      return Vec::new();
    }
    let mut cursor = BitCursor::new(bytes, bytes.len() as u64 * 8);
    let mut state_idx = cursor.read_uint(self.size_log) as AnsState;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
      let node = self.decoder.get_node(state_idx);
      out.push(node.symbol);
      let extra = cursor.read_uint(node.bits_to_read) as AnsState;
      state_idx = node.next_state_idx_base + extra;
    }
    out
  }
}

/// Encodes one park from its (already line-point-sorted, ascending)
/// entries. `line_points` may hold fewer than `kEntriesPerPark` entries only
/// for a table's last park.
pub fn encode_park(
  codec: &DeltaCodec,
  k: u32,
  table_index: usize,
  line_points: &[u128],
) -> PlotResult<Vec<u8>> {
  if line_points.is_empty() {
    return Err(PlotError::invalid_value("a park needs at least one entry"));
  }
  let park_size = calculate_park_size(k, table_index);
  let stub_w = stub_bits(k);
  let stub_mask = (1u128 << stub_w) - 1;

  let mut writer = BitWriter::with_capacity(park_size);
  writer.write_uint128(line_points[0], 2 * k);
  writer.finish_byte();

  let mut symbols = Vec::with_capacity(line_points.len().saturating_sub(1));
  for pair in line_points.windows(2) {
    let big_delta = pair[1] - pair[0];
    let stub = (big_delta & stub_mask) as u64;
    let small_delta = big_delta >> stub_w;
    if small_delta >= 256 {
      return Err(PlotError::encoding_fatal(format!(
        "table {table_index} line-point delta {big_delta} exceeds the park encoder's 256-symbol alphabet"
      )));
    }
    writer.write_uint(stub, stub_w);
    symbols.push(small_delta as Symbol);
  }
  writer.pad_to(line_point_bytes(k) + calculate_stubs_size(k));

  let ans_bytes = codec.encode(&symbols);
  let raw_bytes: Vec<u8> = symbols.iter().map(|&s| s as u8).collect();
  let (raw, payload) = if ans_bytes.len() < raw_bytes.len() {
    (false, ans_bytes)
  } else {
    (true, raw_bytes)
  };
  if payload.len() > SIZE_FIELD_MASK as usize {
    return Err(PlotError::encoding_fatal(format!(
      "table {table_index} park payload of {} bytes overflows the 15-bit size field",
      payload.len()
    )));
  }
  let size_field = payload.len() as u16 | if raw { RAW_FLAG } else { 0 };
  writer.write_bytes_aligned(&size_field.to_le_bytes());
  writer.write_bytes_aligned(&payload);
  writer.pad_to(park_size);

  let bytes = writer.into_bytes();
  debug_assert_eq!(bytes.len(), park_size);
  Ok(bytes)
}

/// Decodes `entry_count` line-points (checkpoint plus `entry_count − 1`
/// successors) from one fixed-size park record.
pub fn decode_park(
  codec: &DeltaCodec,
  k: u32,
  data: &[u8],
  entry_count: usize,
) -> PlotResult<Vec<u128>> {
  if entry_count == 0 {
    return Ok(Vec::new());
  }
  let lp_bytes = line_point_bytes(k);
  let stubs_bytes = calculate_stubs_size(k);
  let stub_w = stub_bits(k);

  let checkpoint = slice_u128(data, 0, 2 * k);
  let size_field_off = lp_bytes + stubs_bytes;
  if data.len() < size_field_off + 2 {
    return Err(PlotError::invalid_value("park too short for its size field"));
  }
  let size_field = u16::from_le_bytes([data[size_field_off], data[size_field_off + 1]]);
  let is_raw = size_field & RAW_FLAG != 0;
  let payload_len = (size_field & SIZE_FIELD_MASK) as usize;
  let payload_start = size_field_off + 2;
  let payload = data
    .get(payload_start..payload_start + payload_len)
    .ok_or_else(|| PlotError::invalid_value("park deltas payload runs past the park's bytes"))?;

  let n_deltas = entry_count - 1;
  let symbols: Vec<Symbol> = if is_raw {
    payload.iter().map(|&b| b as Symbol).collect()
  } else {
    codec.decode(payload, n_deltas)
  };
  if symbols.len() != n_deltas {
    return Err(PlotError::encoding_fatal(
      "park deltas payload decoded to the wrong symbol count",
    ));
  }

  let stubs_start_bit = lp_bytes as u64 * 8;
  let mut line_points = Vec::with_capacity(entry_count);
  line_points.push(checkpoint);
  for (i, &small_delta) in symbols.iter().enumerate() {
    let stub = slice_u64(data, stubs_start_bit + i as u64 * stub_w as u64, stub_w) as u128;
    let big_delta = ((small_delta as u128) << stub_w) | stub;
    line_points.push(line_points[i] + big_delta);
  }
  Ok(line_points)
}

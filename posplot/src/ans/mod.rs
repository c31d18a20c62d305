pub use decoding::Decoder;
pub use encoding::Encoder;
pub use spec::Spec;

mod decoding;
mod encoding;
mod spec;

// must be u16 or larger
pub(crate) type AnsState = u32;
// index into the table's alphabet; table alphabets never exceed 255 symbols.
pub(crate) type Symbol = u16;
// occurrence count of a symbol within an ANS table of size 2^size_log.
pub(crate) type Weight = u32;

#[cfg(test)]
mod tests {
  use crate::ans::spec::Spec;
  use crate::ans::{AnsState, Decoder, Encoder, Symbol};
  use crate::bit_writer::BitWriter;
  use crate::bits::BitCursor;
  use crate::errors::PlotResult;

  fn assert_recovers(spec: &Spec, symbols: Vec<Symbol>) -> PlotResult<()> {
    let encoder = Encoder::new(spec);
    let mut state = encoder.default_state();
    // ANS is LIFO: encode symbols back-to-front, writing the bits for each
    // transition as we go, so that a plain forward bit reader reconstructs
    // the symbols in their original order.
    let mut writer = BitWriter::new();
    let mut to_write = Vec::new();
    for &symbol in symbols.iter().rev() {
      let (new_state, bitlen) = encoder.encode(state, symbol);
      to_write.push((state, bitlen));
      state = new_state;
    }
    for (word, bitlen) in to_write.into_iter().rev() {
      writer.write_uint(word as u64, bitlen);
    }
    let bytes = writer.into_bytes();

    let final_state = state;
    let table_size = 1u32 << encoder.size_log();

    let mut reader = BitCursor::new(&bytes, bytes.len() as u64 * 8);
    let decoder = Decoder::new(spec);
    let mut decoded = Vec::new();
    let mut state_idx = final_state - table_size;
    for _ in 0..symbols.len() {
      let node = decoder.get_node(state_idx);
      decoded.push(node.symbol);
      let extra = reader.read_uint(node.bits_to_read) as AnsState;
      state_idx = node.next_state_idx_base + extra;
    }

    assert_eq!(decoded, symbols);
    Ok(())
  }

  #[test]
  fn ans_encoder_decoder() -> PlotResult<()> {
    let spec = Spec {
      size_log: 3,
      state_symbols: vec![0, 1, 2, 0, 1, 2, 0, 1],
      symbol_weights: vec![3, 3, 2],
    };
    let symbols = vec![2, 0, 1, 1, 1, 0, 0, 1, 2];
    assert_recovers(&spec, symbols)?;

    let mut symbols = Vec::new();
    for _ in 0..200 {
      symbols.push(0);
      symbols.push(1);
      symbols.push(2);
    }
    assert_recovers(&spec, symbols)?;
    Ok(())
  }

  #[test]
  fn ans_encoder_decoder_sparse() -> PlotResult<()> {
    let spec = Spec {
      size_log: 3,
      state_symbols: vec![0, 0, 0, 0, 0, 0, 0, 1],
      symbol_weights: vec![7, 1],
    };
    let mut symbols = Vec::new();
    for _ in 0..100 {
      for _ in 0..7 {
        symbols.push(0);
      }
      symbols.push(1);
    }
    assert_recovers(&spec, symbols)
  }

  #[test]
  fn spec_from_r_value_sums_to_table_size() -> PlotResult<()> {
    let spec = Spec::from_r_value(4.7)?;
    assert_eq!(
      spec.symbol_weights.iter().sum::<u32>(),
      spec.table_size() as u32
    );
    Ok(())
  }
}

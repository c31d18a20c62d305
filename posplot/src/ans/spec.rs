use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::ans::{Symbol, Weight};
use crate::constants::{Bitlen, ANS_TABLE_LOG};
use crate::errors::{PlotError, PlotResult};

// Here and in encoding/decoding, state is between [0, table_size).

pub struct Spec {
  // log base 2 of the table size
  // e.g. the table states will be in [2^size_log, 2^(size_log + 1))
  pub size_log: Bitlen,
  // the ordered symbols in the table
  pub state_symbols: Vec<Symbol>,
  // the number of times each symbol appears in the table
  pub symbol_weights: Vec<Weight>,
}

// We use a relatively prime (odd) number near 3/5 of the table size. In this
// way, uncommon symbols with weight=2, 3, 4, 5 all get pretty reasonable
// spreads (in a slightly more balanced way than e.g. 4/7 would):
// * 2 -> [0, 0.6]
// * 3 -> [0, 0.2, 0.6]
// * 4 -> [0, 0.2, 0.6, 0.8]
// * 5 -> [0, 0.2, 0.4, 0.6, 0.8]
fn choose_stride(table_size: Weight) -> Weight {
  let mut res = (3 * table_size) / 5;
  if res % 2 == 0 {
    res += 1;
  }
  res
}

impl Spec {
  // The general idea is to spread the symbols out as much as possible,
  // deterministically, and ensuring each one gets at least one state.
  // Long runs of the same symbol are generally bad for compression ratio.
  fn spread_state_symbols(size_log: Bitlen, symbol_weights: &[Weight]) -> PlotResult<Vec<Symbol>> {
    let table_size = symbol_weights.iter().sum::<Weight>();
    if table_size != (1 << size_log) {
      return Err(PlotError::encoding_fatal(format!(
        "table size log of {} does not agree with total weight of {}",
        size_log, table_size,
      )));
    }

    let mut res = vec![0; table_size as usize];
    let mut step = 0;
    let stride = choose_stride(table_size);
    let mod_table_size = Weight::MAX >> 1 >> (Weight::BITS as Bitlen - 1 - size_log);
    for (symbol, &weight) in symbol_weights.iter().enumerate() {
      for _ in 0..weight {
        let state_idx = (stride * step) & mod_table_size;
        res[state_idx as usize] = symbol as Symbol;
        step += 1;
      }
    }

    Ok(res)
  }

  pub fn from_weights(size_log: Bitlen, symbol_weights: Vec<Weight>) -> PlotResult<Self> {
    let symbol_weights = if symbol_weights.is_empty() {
      vec![1]
    } else {
      symbol_weights
    };

    let state_symbols = Self::spread_state_symbols(size_log, &symbol_weights)?;

    Ok(Self {
      size_log,
      state_symbols,
      symbol_weights,
    })
  }

  /// Builds a fixed `2^ANS_TABLE_LOG`-state table for a shifted-geometric
  /// distribution shaped by `r` (larger r => more symbols, flatter tail).
  /// Symbol `i`'s ideal probability is proportional to
  /// `(1 - ((e-1)/e)^(1/r))^i`, i.e. the PMF used by the delta codec for
  /// park stubs/line-point deltas (the greater the table index, the rarer
  /// the delta magnitude it represents).
  pub fn from_r_value(r: f64) -> PlotResult<Self> {
    if !(r.is_finite() && r > 0.0) {
      return Err(PlotError::invalid_value(format!(
        "ANS shape parameter must be positive and finite, got {r}"
      )));
    }

    const MIN_PRB_THRESHOLD: f64 = 1e-50;
    const MAX_SYMBOLS: usize = 255;
    const E: f64 = std::f64::consts::E;

    let mut pdf = Vec::new();
    let mut p = 1.0 - ((E - 1.0) / E).powf(1.0 / r);
    let mut n = 0usize;
    while p > MIN_PRB_THRESHOLD && n < MAX_SYMBOLS {
      pdf.push(p);
      n += 1;
      p = (E.powf(1.0 / r) - 1.0) * (E - 1.0).powf(1.0 / r) / E.powf((n + 1) as f64 / r);
    }
    if pdf.is_empty() {
      pdf.push(1.0);
      n = 1;
    }

    let total_quanta = 1u32 << ANS_TABLE_LOG;
    let mut weights = vec![1u32; n];

    // Greedily hand out the remaining quanta to whichever symbol currently
    // gains the most bits-per-occurrence from one more unit of weight,
    // i.e. maximizes pdf[i] * (log2(w+1) - log2(w)).
    #[derive(PartialEq)]
    struct Candidate {
      gain: f64,
      symbol: usize,
    }
    impl Eq for Candidate {}
    impl PartialOrd for Candidate {
      fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
      }
    }
    impl Ord for Candidate {
      fn cmp(&self, other: &Self) -> Ordering {
        self.gain.total_cmp(&other.gain)
      }
    }

    let gain_of = |pdf: &[f64], weights: &[u32], i: usize| -> f64 {
      let w = weights[i] as f64;
      pdf[i] * ((w + 1.0).log2() - w.log2())
    };

    let mut heap = BinaryHeap::with_capacity(n);
    for i in 0..n {
      heap.push(Candidate {
        gain: gain_of(&pdf, &weights, i),
        symbol: i,
      });
    }

    for _ in 0..(total_quanta as usize).saturating_sub(n) {
      let Candidate { symbol, .. } = heap.pop().unwrap();
      weights[symbol] += 1;
      heap.push(Candidate {
        gain: gain_of(&pdf, &weights, symbol),
        symbol,
      });
    }

    Self::from_weights(ANS_TABLE_LOG, weights)
  }

  pub fn table_size(&self) -> usize {
    1 << self.size_log
  }
}

#[cfg(test)]
mod tests {
  use crate::ans::spec::Spec;
  use crate::ans::{Symbol, Weight};
  use crate::errors::PlotResult;

  fn assert_state_symbols(weights: Vec<Weight>, expected: Vec<Symbol>) -> PlotResult<()> {
    let table_size_log = weights.iter().sum::<Weight>().ilog2();
    let spec = Spec::from_weights(table_size_log, weights)?;
    assert_eq!(spec.state_symbols, expected);
    Ok(())
  }

  #[test]
  fn ans_spec_new() -> PlotResult<()> {
    assert_state_symbols(
      vec![1, 1, 3, 11],
      vec![0, 3, 2, 3, 2, 3, 3, 3, 3, 1, 3, 2, 3, 3, 3, 3],
    )
  }

  #[test]
  fn ans_spec_new_trivial() -> PlotResult<()> {
    assert_state_symbols(vec![1], vec![0])?;
    assert_state_symbols(vec![2], vec![0, 0])
  }

  #[test]
  fn ans_spec_from_r_value() -> PlotResult<()> {
    for &r in &[4.7, 2.75, 2.7, 2.6, 2.45, 1.0] {
      let spec = Spec::from_r_value(r)?;
      assert_eq!(spec.table_size(), 1 << super::ANS_TABLE_LOG);
      assert_eq!(
        spec.symbol_weights.iter().sum::<Weight>(),
        spec.table_size() as Weight
      );
      assert!(spec.symbol_weights.iter().all(|&w| w >= 1));
    }
    Ok(())
  }
}

//! `PlotterConfig` (§2a): the single input `create_plot` takes, gathering
//! every knob the four phases need plus the output's identity. Validation
//! (`validate`) runs once, at the top of `create_plot`, rather than being
//! scattered across the phases it feeds — the same shape as pco's
//! `validate_config`/`validate_chunk_size` free functions ahead of its
//! compress driver.

use std::path::PathBuf;

use crate::errors::{PlotError, PlotResult};
use crate::progress::ProgressCallback;

/// `k` is bounded to the range real plots use; table 7 of a `k=18` plot
/// still holds tens of thousands of entries; `k=50` is far past anything
/// this in-memory implementation's `Vec`-backed sort buckets could hold, but
/// the ceiling is kept at the reference value rather than lowered ad hoc.
pub const MIN_K: u32 = 18;
pub const MAX_K: u32 = 50;

/// Every parameter `create_plot` needs, mirroring `CreatePlot(...)`'s
/// signature (§2a): the output's cryptographic identity (`plot_id`, `memo`),
/// sizing knobs threaded straight into the sort manager and stripe workers,
/// and the ambient concerns (temp/final directories, progress reporting,
/// feature flags) that don't change any table's math.
#[derive(Clone)]
#[non_exhaustive]
pub struct PlotterConfig<'a> {
  pub k: u32,
  pub plot_id: [u8; 32],
  /// Opaque bytes carried into the header verbatim (pool/farmer keys in a
  /// real farm, arbitrary in this crate).
  pub memo: Vec<u8>,
  /// Free-text identifier carried into the header's `format_desc` field.
  pub format_desc: Vec<u8>,
  pub tmp_dir: PathBuf,
  pub final_dir: PathBuf,
  pub filename: String,
  /// RAM budget each phase's sort manager is allowed to use for its
  /// in-memory buckets before it would need to spill further (§4.3).
  pub memory_size: usize,
  /// Number of sort-manager buckets; must be a power of two (`log_num_buckets`
  /// derives from it directly).
  pub num_buckets: u32,
  /// Capacity hint for each stripe worker's local match buffer (§4.4 step 2).
  pub stripe_size: u64,
  pub num_threads: usize,
  /// Bitwise-OR of `ENABLE_BITFIELD`/`SHOW_PROGRESS`.
  pub flags: u32,
  pub progress: Option<&'a ProgressCallback<'a>>,
}

impl<'a> PlotterConfig<'a> {
  /// Checks every invariant the four phases assume of their config rather
  /// than discovering a violation midway through a multi-hour plot.
  pub fn validate(&self) -> PlotResult<()> {
    if self.k < MIN_K || self.k > MAX_K {
      return Err(PlotError::invalid_value(format!(
        "k={} is outside the supported range {MIN_K}..={MAX_K}",
        self.k
      )));
    }
    if self.num_buckets == 0 || !self.num_buckets.is_power_of_two() {
      return Err(PlotError::invalid_value(format!(
        "num_buckets={} must be a nonzero power of two",
        self.num_buckets
      )));
    }
    if self.num_threads == 0 {
      return Err(PlotError::invalid_value("num_threads must be nonzero"));
    }
    if self.memory_size == 0 {
      return Err(PlotError::invalid_value("memory_size must be nonzero"));
    }
    if self.format_desc.len() > u16::MAX as usize {
      return Err(PlotError::invalid_value(
        "format_desc does not fit the header's 16-bit length prefix",
      ));
    }
    if self.memo.len() > u16::MAX as usize {
      return Err(PlotError::invalid_value(
        "memo does not fit the header's 16-bit length prefix",
      ));
    }
    if self.filename.is_empty() {
      return Err(PlotError::invalid_value("filename must not be empty"));
    }
    Ok(())
  }

  pub fn log_num_buckets(&self) -> u32 {
    self.num_buckets.trailing_zeros()
  }
}

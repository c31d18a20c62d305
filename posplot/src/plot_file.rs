//! The `create_plot` driver (§2a, §6): runs the four phases in order, then
//! serializes Phase 3's table parks and Phase 4's checkpoint tables into the
//! on-disk plot file format behind `header.rs`.

use std::path::{Path, PathBuf};

use crate::config::PlotterConfig;
use crate::disk::{Disk, RawFileDisk};
use crate::errors::{PlotError, PlotResult};
use crate::header::{encode_table_pointers, PlotHeader, IDX_C1, IDX_C2, IDX_C3, IDX_P7, NUM_TABLE_POINTERS};
use crate::phase1::{run_phase1, Phase1Config};
use crate::phase2::{run_phase2, Phase2Config};
use crate::phase3::{run_phase3, Phase3Config, Phase3Output};
use crate::phase4::{run_phase4, Phase4Config, Phase4Output};
use crate::progress::report;

/// Runs every phase against `cfg` and writes the finished plot file under
/// `cfg.final_dir`, returning its path. The file is assembled under a
/// `.tmp` name and atomically renamed into place once fully written, so a
/// crash mid-write never leaves a half-written file at the real filename.
pub fn create_plot(cfg: &PlotterConfig) -> PlotResult<PathBuf> {
  cfg.validate()?;
  let _span = tracing::info_span!("create_plot", k = cfg.k).entered();

  tracing::info!("phase 1: forward propagation");
  let phase1_cfg = Phase1Config {
    k: cfg.k,
    plot_id: cfg.plot_id,
    tmp_dir: cfg.tmp_dir.clone(),
    memory_size: cfg.memory_size,
    num_threads: cfg.num_threads,
    log_num_buckets: cfg.log_num_buckets(),
    stripe_size: cfg.stripe_size,
  };
  let phase1 = run_phase1(&phase1_cfg)?;
  report(cfg.progress, 1, 1, 1);

  tracing::info!("phase 2: back propagation");
  let phase2_cfg = Phase2Config {
    k: cfg.k,
    tmp_dir: cfg.tmp_dir.clone(),
    memory_size: cfg.memory_size,
    log_num_buckets: cfg.log_num_buckets(),
  };
  let phase2 = run_phase2(phase1, &phase2_cfg)?;
  report(cfg.progress, 2, 1, 1);

  tracing::info!("phase 3: compression");
  let phase3_cfg = Phase3Config { k: cfg.k };
  let phase3 = run_phase3(phase2, &phase3_cfg)?;
  report(cfg.progress, 3, 1, 1);

  // Phase 2 stashed table 1's dense view in a side file for Phase 3's
  // Table1View reads; nothing downstream touches it again.
  let table1_tmp = cfg.tmp_dir.join("p2_table1.tmp");
  if table1_tmp.exists() {
    if let Err(e) = std::fs::remove_file(&table1_tmp) {
      tracing::warn!(path = %table1_tmp.display(), error = %e, "failed to remove phase 2 scratch file");
    }
  }

  tracing::info!("phase 4: checkpoint tables");
  let phase4_cfg = Phase4Config { k: cfg.k };
  let phase4 = run_phase4(&phase3, &phase4_cfg)?;
  report(cfg.progress, 4, 1, 1);

  let final_path = cfg.final_dir.join(&cfg.filename);
  let tmp_path = cfg.final_dir.join(format!("{}.tmp", cfg.filename));
  write_plot_file(&tmp_path, cfg, &phase3, &phase4)?;
  std::fs::rename(&tmp_path, &final_path).map_err(PlotError::from)?;
  tracing::info!(path = %final_path.display(), "plot file written");
  Ok(final_path)
}

/// Lays the header prefix, a zeroed pointer table, every table's parks, and
/// the checkpoint tables out sequentially, then back-patches the pointer
/// table once every region's true offset is known.
fn write_plot_file(
  path: &Path,
  cfg: &PlotterConfig,
  phase3: &Phase3Output,
  phase4: &Phase4Output,
) -> PlotResult<()> {
  let header = PlotHeader {
    plot_id: cfg.plot_id,
    k: cfg.k,
    format_desc: cfg.format_desc.clone(),
    memo: cfg.memo.clone(),
    table7_entries: phase4.final_entries_written,
  };
  let prefix = header.encode_prefix();
  let pointer_table_base = prefix.len() as u64;

  let mut disk = RawFileDisk::create(path)?;
  disk.write(0, &prefix)?;
  disk.write(pointer_table_base, &vec![0u8; NUM_TABLE_POINTERS * 8])?;

  let mut offset = pointer_table_base + (NUM_TABLE_POINTERS * 8) as u64;
  let mut offsets = [0u64; NUM_TABLE_POINTERS];

  for (i, table) in phase3.tables.iter().enumerate() {
    offsets[i] = offset;
    disk.write(offset, &table.parks)?;
    offset += table.parks.len() as u64;
  }

  offsets[IDX_P7] = offset;
  disk.write(offset, &phase4.p7_parks)?;
  offset += phase4.p7_parks.len() as u64;

  offsets[IDX_C1] = offset;
  disk.write(offset, &phase4.c1)?;
  offset += phase4.c1.len() as u64;

  offsets[IDX_C2] = offset;
  disk.write(offset, &phase4.c2)?;
  offset += phase4.c2.len() as u64;

  offsets[IDX_C3] = offset;
  disk.write(offset, &phase4.c3)?;
  offset += phase4.c3.len() as u64;

  disk.write(pointer_table_base, &encode_table_pointers(&offsets))?;
  disk.truncate(offset)?;
  Ok(())
}

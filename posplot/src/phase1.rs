//! Forward propagation (C4, Phase 1, §4.4): derives tables 2..7 from table 1
//! by repeatedly matching a y-sorted table against itself and evaluating Fx
//! over each match. Table 1 is compacted in place to just the entries that
//! took part in a match (the rest are cheap to re-derive from F1 later, see
//! DESIGN.md); tables 2..7 need no such compaction since every one of their
//! entries is itself the record of a match and so is already dense.

use std::ops::Range;
use std::path::PathBuf;

use crate::constants::{Bitlen, K_BATCH_SIZE_LOG, K_OFFSET_SIZE};
use crate::entry::{MidEntry, T1Entry, T7PreEntry};
use crate::errors::{PlotError, PlotResult};
use crate::f1::f1_batch;
use crate::fx::{fx, input_metadata_bits, Metadata};
use crate::matching::{bucket_of, find_matches, Match, MatchTargets};
use crate::ring;
use crate::sort_manager::{SortManager, SortedStream};

/// Parameters shared by every stage of the forward-propagation driver.
pub struct Phase1Config {
  pub k: u32,
  pub plot_id: [u8; 32],
  pub tmp_dir: PathBuf,
  pub memory_size: usize,
  pub num_threads: usize,
  pub log_num_buckets: Bitlen,
  /// Expected match count per stripe worker, used only as a capacity hint
  /// for each worker's local match buffer.
  pub stripe_size: u64,
}

/// Every table forward propagation produced, each sorted ascending by its
/// own `y` (the natural order the next iteration's matching pass needs).
pub struct Phase1Output {
  pub table1: SortedStream,
  /// Tables 2..6, in order.
  pub tables: Vec<SortedStream>,
  pub table7: SortedStream,
  /// Match counts found at each of the six iterations (t = 1..6); tables
  /// 2..7's entry count always equals the match count of the iteration that
  /// built it. Table 1's compacted length does not: it's the count of
  /// *distinct* L entries that took part in at least one match, which is
  /// `<= match_counts[0]` whenever an L entry matches more than one R.
  pub match_counts: Vec<u64>,
}

/// Runs table 1's F1 seeding pass, then all six forward-propagation
/// iterations, producing every derived table.
pub fn run_phase1(cfg: &Phase1Config) -> PlotResult<Phase1Output> {
  let k = cfg.k;
  let table1_sorted = seed_table1(cfg)?;

  let targets = MatchTargets::new();
  let (table1, table2, m1) = step_table1(&targets, k, &table1_sorted, cfg)?;

  let mut match_counts = vec![m1];
  let mut tables = Vec::with_capacity(5);
  let mut prev = table2;
  for t_out in 3..=6u32 {
    let next = step_mid(&targets, k, t_out, &prev, cfg)?;
    match_counts.push(next.len());
    tables.push(std::mem::replace(&mut prev, next));
  }
  tables.push(prev);

  let table7 = step_mid(&targets, k, 7, tables.last().unwrap(), cfg)?;
  match_counts.push(table7.len());

  Ok(Phase1Output {
    table1,
    tables,
    table7,
    match_counts,
  })
}

fn seed_table1(cfg: &Phase1Config) -> PlotResult<SortedStream> {
  let k = cfg.k;
  let n = 1u64 << k;
  let mut sm = SortManager::new(
    cfg.tmp_dir.as_path(),
    "t1",
    T1Entry::size_bytes(k),
    0,
    cfg.log_num_buckets,
    cfg.memory_size,
  );
  let batch = 1u64 << K_BATCH_SIZE_LOG;
  let mut x = 0u64;
  while x < n {
    let count = batch.min(n - x);
    for (y, xi) in f1_batch(k, &cfg.plot_id, x, count) {
      sm.add(&T1Entry { y, x: xi }.encode(k))?;
    }
    x += count;
  }
  sm.flush()
}

fn offset_from_indices(l: usize, r: usize) -> PlotResult<u64> {
  debug_assert!(r > l);
  let offset = (r - l) as u64;
  let limit = ((1u64 << K_OFFSET_SIZE) * 97) / 100;
  if offset >= limit {
    return Err(PlotError::invalid_state(format!(
      "match offset {offset} exceeds the kOffsetSize bound of {limit}"
    )));
  }
  Ok(offset)
}

/// Like [`offset_from_indices`] but for two already-remapped positions
/// (used when the L side has been compacted and raw index gaps no longer
/// equal the gap between the two entries' final positions).
fn offset_from_positions(new_l: u64, new_r: u64) -> PlotResult<u64> {
  debug_assert!(new_r > new_l);
  let offset = new_r - new_l;
  let limit = ((1u64 << K_OFFSET_SIZE) * 97) / 100;
  if offset >= limit {
    return Err(PlotError::invalid_state(format!(
      "match offset {offset} exceeds the kOffsetSize bound of {limit}"
    )));
  }
  Ok(offset)
}

/// A contiguous run of one BC-bucket's entries within a y-sorted table.
fn bucket_runs(ys: &[u64]) -> Vec<(u64, Range<usize>)> {
  let mut runs = Vec::new();
  let mut i = 0;
  while i < ys.len() {
    let b = bucket_of(ys[i]);
    let start = i;
    while i < ys.len() && bucket_of(ys[i]) == b {
      i += 1;
    }
    runs.push((b, start..i));
  }
  runs
}

/// Finds every match in a y-sorted table, splitting the adjacent-bucket
/// pairs across `num_threads` stripe workers arranged in the rendezvous ring
/// (§4.4 step 2, §5). Each worker computes its own pairs independently (they
/// touch disjoint index ranges); the ring handshake around publication
/// mirrors the ordered stripe handoff the reference driver relies on, even
/// though final match order here doesn't otherwise depend on it.
fn find_all_matches_parallel(
  targets: &MatchTargets,
  ys: &[u64],
  num_threads: usize,
  stripe_size: u64,
) -> PlotResult<Vec<Match>> {
  let runs = bucket_runs(ys);
  let num_pairs = runs.len().saturating_sub(1);
  if num_pairs == 0 {
    return Ok(Vec::new());
  }
  let num_threads = num_threads.max(1).min(num_pairs);
  let chunk = (num_pairs + num_threads - 1) / num_threads;
  let handles = ring::build_ring(num_threads);
  let local_capacity_hint = stripe_size as usize;

  let per_worker = std::thread::scope(|scope| -> PlotResult<Vec<Vec<Match>>> {
    let join_handles: Vec<_> = handles
      .into_iter()
      .enumerate()
      .map(|(worker_id, handle)| {
        scope.spawn(move || -> PlotResult<Vec<Match>> {
          let start = worker_id * chunk;
          let end = ((worker_id + 1) * chunk).min(num_pairs);
          let mut local = Vec::with_capacity(local_capacity_hint);
          for pair in start..end {
            let (b_l, range_l) = &runs[pair];
            let (b_r, range_r) = &runs[pair + 1];
            if *b_r == b_l + 1 {
              let found = find_matches(targets, &ys[range_l.clone()], &ys[range_r.clone()]);
              local.extend(found.into_iter().map(|m| Match {
                l_index: range_l.start + m.l_index,
                r_index: range_r.start + m.r_index,
              }));
            }
          }
          handle.wait_for_left()?;
          handle.signal_right()?;
          Ok(local)
        })
      })
      .collect();

    let mut out = Vec::with_capacity(join_handles.len());
    for jh in join_handles {
      let local = jh
        .join()
        .map_err(|_| PlotError::invalid_state("a stripe worker panicked"))??;
      out.push(local);
    }
    Ok(out)
  })?;

  Ok(per_worker.into_iter().flatten().collect())
}

/// t=1: matches table 1 against itself, compacts it down to the entries
/// that matched, and produces table 2 from the match set.
fn step_table1(
  targets: &MatchTargets,
  k: u32,
  table1_sorted: &SortedStream,
  cfg: &Phase1Config,
) -> PlotResult<(SortedStream, SortedStream, u64)> {
  let n = table1_sorted.len() as usize;
  let mut ys = Vec::with_capacity(n);
  let mut xs = Vec::with_capacity(n);
  for i in 0..n as u64 {
    let e = T1Entry::decode(table1_sorted.get(i), k);
    ys.push(e.y);
    xs.push(e.x);
  }

  let matches = find_all_matches_parallel(targets, &ys, cfg.num_threads, cfg.stripe_size)?;

  let mut used = vec![false; n];
  for m in &matches {
    used[m.l_index] = true;
    used[m.r_index] = true;
  }
  let mut remap = vec![0u64; n];
  let mut rank = 0u64;
  let mut compact_bytes = Vec::new();
  for i in 0..n {
    if used[i] {
      remap[i] = rank;
      rank += 1;
      compact_bytes.extend_from_slice(&T1Entry { y: ys[i], x: xs[i] }.encode(k));
    }
  }
  let table1_compact = SortedStream::from_sorted_bytes(compact_bytes, T1Entry::size_bytes(k));

  let meta_bits = input_metadata_bits(2, k);
  let mut sm = SortManager::new(
    cfg.tmp_dir.as_path(),
    "t2",
    MidEntry::size_bytes(2, k),
    0,
    cfg.log_num_buckets,
    cfg.memory_size,
  );
  for m in &matches {
    let meta_l = Metadata::new(xs[m.l_index] as u128, meta_bits);
    let meta_r = Metadata::new(xs[m.r_index] as u128, meta_bits);
    let (y_out, meta_out) = fx(2, k, ys[m.l_index], meta_l, meta_r);
    let entry = MidEntry {
      y: y_out,
      pos: remap[m.l_index],
      offset: offset_from_positions(remap[m.l_index], remap[m.r_index])?,
      metadata: meta_out.expect("fx(2, ..) always carries metadata forward"),
    };
    sm.add(&entry.encode(2, k))?;
  }
  let table2 = sm.flush()?;
  let match_count = table2.len();
  Ok((table1_compact, table2, match_count))
}

/// t = 2..6: matches a `MidEntry` table against itself and produces the next
/// table (`MidEntry` for t_out in 2..6, `T7PreEntry` for t_out = 7).
fn step_mid(
  targets: &MatchTargets,
  k: u32,
  t_out: u32,
  left_sorted: &SortedStream,
  cfg: &Phase1Config,
) -> PlotResult<SortedStream> {
  let t_left = t_out - 1;
  let n = left_sorted.len() as usize;
  let mut ys = Vec::with_capacity(n);
  let mut metas = Vec::with_capacity(n);
  for i in 0..n as u64 {
    let e = MidEntry::decode(left_sorted.get(i), t_left, k);
    ys.push(e.y);
    metas.push(e.metadata);
  }

  let matches = find_all_matches_parallel(targets, &ys, cfg.num_threads, cfg.stripe_size)?;

  if t_out == 7 {
    let mut sm = SortManager::new(
      cfg.tmp_dir.as_path(),
      "t7",
      T7PreEntry::size_bytes(k),
      0,
      cfg.log_num_buckets,
      cfg.memory_size,
    );
    for m in &matches {
      let (y_out, _) = fx(7, k, ys[m.l_index], metas[m.l_index], metas[m.r_index]);
      let entry = T7PreEntry {
        y: y_out,
        pos: m.l_index as u64,
        offset: offset_from_indices(m.l_index, m.r_index)?,
      };
      sm.add(&entry.encode(k))?;
    }
    return sm.flush();
  }

  let mut sm = SortManager::new(
    cfg.tmp_dir.as_path(),
    format!("t{t_out}"),
    MidEntry::size_bytes(t_out, k),
    0,
    cfg.log_num_buckets,
    cfg.memory_size,
  );
  for m in &matches {
    let (y_out, meta_out) = fx(t_out, k, ys[m.l_index], metas[m.l_index], metas[m.r_index]);
    let entry = MidEntry {
      y: y_out,
      pos: m.l_index as u64,
      offset: offset_from_indices(m.l_index, m.r_index)?,
      metadata: meta_out.expect("fx(t_out < 7, ..) always carries metadata forward"),
    };
    sm.add(&entry.encode(t_out, k))?;
  }
  sm.flush()
}

//! Bucketed external sort manager (C3, §4.3). Accepts a stream of
//! fixed-size entries, partitions them into `2^log_num_buckets` buckets by
//! the bits at `[begin_bits, begin_bits+log_num_buckets)`, spills a bucket to
//! disk once its in-memory staging region fills, and — once `flush()` is
//! called — sorts and concatenates every bucket into one logically sorted
//! stream.

use std::path::PathBuf;

use crate::bits::extract_bucket;
use crate::constants::Bitlen;
use crate::disk::{Disk, RawFileDisk};
use crate::errors::{PlotError, PlotResult};
use crate::uniform_sort::sort_bucket;

struct Bucket {
  staged: Vec<u8>,
  disk: Option<RawFileDisk>,
  path: PathBuf,
  disk_len: u64,
}

impl Bucket {
  fn total_len(&self) -> u64 {
    self.disk_len + self.staged.len() as u64
  }

  fn spill(&mut self) -> PlotResult<()> {
    if self.staged.is_empty() {
      return Ok(());
    }
    if self.disk.is_none() {
      self.disk = Some(RawFileDisk::create(&self.path)?);
    }
    let disk = self.disk.as_mut().unwrap();
    disk.write(self.disk_len, &self.staged)?;
    self.disk_len += self.staged.len() as u64;
    self.staged.clear();
    Ok(())
  }
}

/// A bucketed external sort manager in its write phase.
pub struct SortManager {
  tmp_dir: PathBuf,
  base_name: String,
  entry_size: usize,
  begin_bits: u64,
  log_num_buckets: Bitlen,
  memory_size: usize,
  per_bucket_capacity: usize,
  buckets: Vec<Bucket>,
}

impl SortManager {
  pub fn new(
    tmp_dir: impl Into<PathBuf>,
    base_name: impl Into<String>,
    entry_size: usize,
    begin_bits: u64,
    log_num_buckets: Bitlen,
    memory_size: usize,
  ) -> Self {
    let tmp_dir = tmp_dir.into();
    let base_name = base_name.into();
    let num_buckets = 1usize << log_num_buckets;
    let per_bucket_capacity = (memory_size / num_buckets).max(entry_size);
    let buckets = (0..num_buckets)
      .map(|i| Bucket {
        staged: Vec::new(),
        disk: None,
        path: tmp_dir.join(format!("{base_name}.sort_bucket_{i:03}.tmp")),
        disk_len: 0,
      })
      .collect();
    Self {
      tmp_dir,
      base_name,
      entry_size,
      begin_bits,
      log_num_buckets,
      memory_size,
      per_bucket_capacity,
      buckets,
    }
  }

  pub fn add(&mut self, entry: &[u8]) -> PlotResult<()> {
    debug_assert_eq!(entry.len(), self.entry_size);
    let bucket_id = extract_bucket(entry, self.begin_bits, self.log_num_buckets) as usize;
    let bucket = &mut self.buckets[bucket_id];
    bucket.staged.extend_from_slice(entry);
    if bucket.staged.len() >= self.per_bucket_capacity {
      bucket.spill()?;
    }
    Ok(())
  }

  /// Sorts every bucket and concatenates them (in ascending bucket-id order)
  /// into one logically sorted stream. Consumes the manager; each bucket
  /// file is deleted as soon as it's been read back into memory and sorted.
  pub fn flush(mut self) -> PlotResult<SortedStream> {
    let mut out = Vec::new();
    let num_buckets = self.buckets.len();
    for (i, mut bucket) in std::mem::take(&mut self.buckets).into_iter().enumerate() {
      bucket.spill()?;
      let n = bucket.disk_len / self.entry_size as u64;
      if n == 0 {
        continue;
      }
      if bucket.total_len() as usize > self.memory_size {
        return Err(PlotError::insufficient_memory(format!(
          "bucket {i} of {} has {n} entries, exceeding the {}-byte RAM arena",
          self.base_name, self.memory_size
        )));
      }
      let bytes = {
        let disk = bucket.disk.as_mut().unwrap();
        disk.read(0, bucket.disk_len as usize)?
      };
      let force_quicksort = i + 1 == num_buckets;
      let sorted = sort_bucket(
        &bytes,
        self.entry_size,
        self.begin_bits,
        self.log_num_buckets,
        self.memory_size,
        force_quicksort,
      )?;
      out.extend_from_slice(&sorted);
      if bucket.disk.is_some() {
        let _ = std::fs::remove_file(&bucket.path);
      }
    }
    Ok(SortedStream {
      entries: out,
      entry_size: self.entry_size,
    })
  }
}

/// The fully sorted, concatenated output of a drained [`SortManager`].
pub struct SortedStream {
  entries: Vec<u8>,
  entry_size: usize,
}

impl SortedStream {
  /// Wraps an already-sorted, densely packed byte buffer (e.g. table 1 after
  /// Phase 1's compaction pass, which only filters and never reorders) as a
  /// [`SortedStream`] without going through a [`SortManager`] write/flush
  /// cycle.
  pub fn from_sorted_bytes(entries: Vec<u8>, entry_size: usize) -> Self {
    debug_assert_eq!(entries.len() % entry_size, 0);
    Self {
      entries,
      entry_size,
    }
  }

  pub fn len(&self) -> u64 {
    (self.entries.len() / self.entry_size) as u64
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, i: u64) -> &[u8] {
    let start = i as usize * self.entry_size;
    &self.entries[start..start + self.entry_size]
  }

  pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
    self.entries.chunks_exact(self.entry_size)
  }
}

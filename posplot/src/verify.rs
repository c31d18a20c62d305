//! Stateless verification (§1, §8 property 8): given a challenge and the 64
//! leaf `x` values of a claimed proof, recompute F1/Fx bottom-up exactly as
//! Phase 1 would have, checking the matching relation at every level, and
//! confirm the resulting table-7 `y` equals the challenge's target. No plot
//! file is read; this module never touches disk.

use crate::bits::slice_u64;
use crate::constants::K_VECTOR_LENS;
use crate::entry::Quality;
use crate::errors::{PlotError, PlotResult};
use crate::f1::f1;
use crate::fx::{fx, Metadata};
use crate::matching::{bucket_of, is_match};
use crate::prove::{quality_from_xs, Proof, PROOF_SIZE};

/// One `(y, metadata)` pair carried between levels of the bottom-up fold.
#[derive(Clone, Copy)]
struct Node {
  y: u64,
  meta: Metadata,
}

/// Orders a pair of nodes so the BC-bucket-earlier one comes first, as
/// `fx` requires `bucket(y_left) + 1 == bucket(y_right)`. Returns `None` if
/// neither order satisfies adjacency.
fn order_pair(a: Node, b: Node) -> Option<(Node, Node)> {
  if bucket_of(a.y) + 1 == bucket_of(b.y) {
    Some((a, b))
  } else if bucket_of(b.y) + 1 == bucket_of(a.y) {
    Some((b, a))
  } else {
    None
  }
}

/// Recomputes the proof's table-7 `y` by folding `proof.xs` bottom-up
/// through F1 and Fx(2..7), checking the matching relation at every level.
/// Returns the final `y` (table 7, `k` bits) on success.
fn recompute_y7(k: u32, plot_id: &[u8; 32], xs: &[u64]) -> PlotResult<u64> {
  if xs.len() != PROOF_SIZE {
    return Err(PlotError::invalid_value(format!(
      "proof has {} leaves, expected {PROOF_SIZE}",
      xs.len()
    )));
  }

  let mut nodes: Vec<Node> = xs
    .iter()
    .map(|&x| {
      if x >= 1u64 << k {
        return Err(PlotError::invalid_value(format!(
          "leaf x={x} does not fit in k={k} bits"
        )));
      }
      Ok(Node {
        y: f1(k, plot_id, x),
        meta: Metadata::new(x as u128, k),
      })
    })
    .collect::<PlotResult<_>>()?;

  for t in 2..=7u32 {
    if nodes.len() % 2 != 0 {
      return Err(PlotError::invalid_value(
        "proof does not fold into pairs at every level",
      ));
    }
    let expected_meta_bits = K_VECTOR_LENS[t as usize] * k;
    let mut next = Vec::with_capacity(nodes.len() / 2);
    for pair in nodes.chunks(2) {
      let (left, right) = order_pair(pair[0], pair[1])
        .ok_or_else(|| PlotError::invalid_value("proof pair spans non-adjacent BC buckets"))?;
      if left.meta.bits != expected_meta_bits || right.meta.bits != expected_meta_bits {
        return Err(PlotError::invalid_value(
          "proof metadata width disagrees with table geometry",
        ));
      }
      if !is_match(left.y, right.y) {
        return Err(PlotError::invalid_value("proof pair fails the matching relation"));
      }
      let (y_new, meta_new) = fx(t, k, left.y, left.meta, right.meta);
      next.push(Node {
        y: y_new,
        meta: meta_new.unwrap_or(Metadata::empty()),
      });
    }
    nodes = next;
  }

  debug_assert_eq!(nodes.len(), 1);
  Ok(nodes[0].y)
}

/// Verifies `proof` against `challenge` for a plot of size `k` and identity
/// `plot_id`, returning the proof's quality on success. This never opens a
/// plot file: every input it needs is in `proof`, making it a pure function
/// the prover's disk-backed output must agree with (§8 property 8).
pub fn verify_proof(k: u32, plot_id: &[u8; 32], challenge: &[u8; 32], proof: &Proof) -> PlotResult<Quality> {
  let target_y = slice_u64(challenge, 0, k);
  let y7 = recompute_y7(k, plot_id, &proof.xs)?;
  if y7 != target_y {
    return Err(PlotError::invalid_value(
      "recomputed table-7 y does not match the challenge",
    ));
  }
  Ok(quality_from_xs(k, challenge, &proof.xs))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PlotterConfig;
  use crate::plot_file::create_plot;
  use crate::prove::{get_full_proof, get_qualities_for_challenge};

  /// Plots a tiny real `k=18` plot and checks every quality the prover finds
  /// for a batch of challenges round-trips through the verifier with a
  /// matching quality, end to end through all four phases.
  fn tiny_plot_id() -> [u8; 32] {
    let mut id = [0u8; 32];
    for (i, b) in id.iter_mut().enumerate() {
      *b = (i * 7 + 3) as u8;
    }
    id
  }

  fn run_plot(dir: &std::path::Path, k: u32) -> std::path::PathBuf {
    let cfg = PlotterConfig {
      k,
      plot_id: tiny_plot_id(),
      memo: vec![1, 2, 3, 4, 5],
      format_desc: b"posplot-v1".to_vec(),
      tmp_dir: dir.to_path_buf(),
      final_dir: dir.to_path_buf(),
      filename: format!("k{k}.plot"),
      memory_size: 1 << 26,
      num_buckets: 64,
      stripe_size: 1 << 14,
      num_threads: 2,
      flags: 0,
      progress: None,
    };
    create_plot(&cfg).unwrap();
    dir.join(&cfg.filename)
  }

  #[test]
  fn test_verify_accepts_every_prover_quality() {
    let dir = tempfile::tempdir().unwrap();
    let k = 18;
    let path = run_plot(dir.path(), k);

    let mut checked_any = false;
    for i in 0u32..100 {
      let challenge = *blake3::hash(&i.to_be_bytes()).as_bytes();
      let qualities = get_qualities_for_challenge(&path, challenge).unwrap();
      for (qi, &expected_quality) in qualities.iter().enumerate() {
        checked_any = true;
        let proof = get_full_proof(&path, challenge, qi).unwrap();
        let quality = verify_proof(k, &tiny_plot_id(), &challenge, &proof).unwrap();
        assert_eq!(quality, expected_quality);
      }
    }
    assert!(checked_any, "expected at least one challenge to produce a proof at k=18");
  }

  #[test]
  fn test_verify_rejects_tampered_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let k = 18;
    let path = run_plot(dir.path(), k);

    for i in 0u32..50 {
      let challenge = *blake3::hash(&i.to_be_bytes()).as_bytes();
      let qualities = get_qualities_for_challenge(&path, challenge).unwrap();
      if qualities.is_empty() {
        continue;
      }
      let mut proof = get_full_proof(&path, challenge, 0).unwrap();
      proof.xs[0] ^= 1;
      assert!(verify_proof(k, &tiny_plot_id(), &challenge, &proof).is_err());
      return;
    }
    panic!("expected at least one challenge to produce a proof at k=18");
  }

  #[test]
  fn test_verify_rejects_wrong_length_proof() {
    let proof = Proof { xs: vec![0u64; 10] };
    let challenge = [0u8; 32];
    assert!(verify_proof(18, &tiny_plot_id(), &challenge, &proof).is_err());
  }
}

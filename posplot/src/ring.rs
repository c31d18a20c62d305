//! Stripe-worker rendezvous ring (§5): worker `i` may publish its stripe's
//! output only after receiving from worker `i-1`, and must signal worker
//! `i+1` before moving on or joining. Re-architected per SPEC_FULL.md §9 as
//! one bounded rendezvous channel per neighbor pair (`crossbeam-channel`)
//! rather than a raw semaphore array.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::errors::{PlotError, PlotResult};

/// One worker's view of the ring: a handle to wait on its left neighbor and
/// signal its right neighbor.
pub struct RingHandle {
  pub id: usize,
  recv_left: Receiver<()>,
  send_right: Sender<()>,
}

impl RingHandle {
  /// Blocks until the left neighbor has signaled. Must be called before a
  /// worker publishes a stripe's output to any shared writer.
  pub fn wait_for_left(&self) -> PlotResult<()> {
    self
      .recv_left
      .recv()
      .map_err(|_| PlotError::invalid_state("ring: left neighbor's channel closed unexpectedly"))
  }

  /// Signals the right neighbor. Must be called exactly once per stripe a
  /// worker completes, and once more during teardown even on error, so a
  /// failing worker never strands the rest of the ring (§7, "tear-down
  /// safe").
  pub fn signal_right(&self) -> PlotResult<()> {
    self
      .send_right
      .send(())
      .map_err(|_| PlotError::invalid_state("ring: right neighbor's channel closed unexpectedly"))
  }
}

/// Builds an `n`-worker ring. The last worker's outgoing channel starts
/// pre-loaded with one token, so worker 0 (which waits on it) can proceed
/// immediately rather than deadlocking on a neighbor that hasn't run yet —
/// the liveness invariant from SPEC_FULL.md §5.
pub fn build_ring(n: usize) -> Vec<RingHandle> {
  assert!(n >= 1, "a ring needs at least one worker");

  let mut senders = Vec::with_capacity(n);
  let mut receivers: Vec<Option<Receiver<()>>> = Vec::with_capacity(n);
  for _ in 0..n {
    let (tx, rx) = bounded::<()>(1);
    senders.push(tx);
    receivers.push(Some(rx));
  }
  senders[n - 1]
    .send(())
    .expect("fresh channel always accepts the first send");

  let mut handles = Vec::with_capacity(n);
  for i in 0..n {
    let send_right = senders[i].clone();
    let recv_left = receivers[(i + n - 1) % n]
      .take()
      .expect("each receiver is claimed by exactly one worker");
    handles.push(RingHandle {
      id: i,
      recv_left,
      send_right,
    });
  }
  handles
}

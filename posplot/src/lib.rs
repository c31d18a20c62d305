//! # API Notes
//!
//! * Plotting, proving, and verification all share one fixed-layout entry
//!   format per table and phase; see `entry` and SPEC_FULL.md §3 for the
//!   exact bit layouts.
//! * All multi-byte on-disk integers are big-endian; `bits`/`bit_writer`
//!   enforce this at every read/write site rather than relying on the host's
//!   native endianness.
//! * `create_plot` takes exclusive ownership of its temporary directory for
//!   the duration of the call; nothing here coordinates with a concurrently
//!   running plotter targeting the same directory.

#![allow(clippy::uninit_vec)]
#![deny(clippy::unused_unit)]

pub use config::PlotterConfig;
pub use constants::{ENABLE_BITFIELD, SHOW_PROGRESS};
pub use entry::Quality;
pub use errors::{ErrorKind, PlotError, PlotResult};
pub use plot_file::create_plot;
pub use progress::{Progress, ProgressCallback};
pub use prove::{get_full_proof, get_qualities_for_challenge, Proof};
pub use verify::verify_proof;

mod ans;
mod bit_writer;
mod bitfield;
mod bits;
mod config;
mod constants;
mod disk;
mod entry;
mod errors;
mod f1;
mod fx;
mod header;
mod line_point;
mod matching;
mod park;
mod phase1;
mod phase2;
mod phase3;
mod phase4;
mod plot_file;
mod progress;
mod prove;
mod ring;
mod sort_manager;
mod uniform_sort;
mod verify;

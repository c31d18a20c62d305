/// Hook invoked by the driver at fixed sub-phase checkpoints when
/// `SHOW_PROGRESS` is set on the config's flags. Rendering a bar or
/// percentage from these calls is the caller's responsibility.
pub type ProgressCallback<'a> = dyn Fn(u8, u64, u64) + Send + Sync + 'a;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
  pub phase: u8,
  pub n: u64,
  pub max_n: u64,
}

pub(crate) fn report(cb: Option<&ProgressCallback>, phase: u8, n: u64, max_n: u64) {
  if let Some(cb) = cb {
    cb(phase, n, max_n);
  }
}

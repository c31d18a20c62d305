use std::error::Error;
use std::fmt::{Display, Formatter};
use std::{fmt, io};

/// The different kinds of errors the plotter, prover, and verifier can return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
  /// malformed argument, position out of window, wrong-bucket trigger.
  InvalidValue,
  /// write after flush, counter mismatch, offset overflow, left-writer overrun.
  InvalidState,
  /// a sort manager bucket exceeded the RAM arena.
  InsufficientMemory,
  /// short read/write that the disk layer gave up retrying.
  IoTransient,
  /// cannot open/create/truncate/rename a file.
  IoFatal,
  /// ANS decoder reached a sentinel ("bad symbol") entry.
  EncodingFatal,
}

/// The error type used in results for all `posplot` functionality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlotError {
  pub kind: ErrorKind,
  pub message: String,
}

impl PlotError {
  pub fn new<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
    PlotError {
      kind,
      message: message.as_ref().to_string(),
    }
  }

  pub fn invalid_value<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::InvalidValue, message)
  }

  pub fn invalid_state<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::InvalidState, message)
  }

  pub fn insufficient_memory<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::InsufficientMemory, message)
  }

  pub fn io_fatal<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::IoFatal, message)
  }

  pub fn encoding_fatal<S: AsRef<str>>(message: S) -> Self {
    Self::new(ErrorKind::EncodingFatal, message)
  }
}

impl Display for PlotError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "posplot {:?} error: {}", self.kind, &self.message)
  }
}

impl From<io::Error> for PlotError {
  fn from(err: io::Error) -> Self {
    let kind = match err.kind() {
      io::ErrorKind::UnexpectedEof | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
        ErrorKind::IoTransient
      }
      _ => ErrorKind::IoFatal,
    };
    PlotError {
      kind,
      message: format!("{}", err),
    }
  }
}

impl Error for PlotError {}

pub type PlotResult<T> = Result<T, PlotError>;

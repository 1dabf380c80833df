//! Crate-wide error types (component: error handling).
//!
//! Hand-written rather than derived, matching the teacher's own
//! `src/error.rs`: no `thiserror`, manual `Display`/`std::error::Error`.

use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
  Compile(Vec<CompileError>),
  Runtime(RuntimeError),
}

impl Error {
  /// The exit code the CLI maps this error onto (§6: 65 for a static
  /// compile error, 70 for an error raised while running).
  pub fn exit_code(&self) -> i32 {
    match self {
      Error::Compile(_) => 65,
      Error::Runtime(_) => 70,
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Compile(errors) => {
        for (i, e) in errors.iter().enumerate() {
          if i > 0 {
            writeln!(f)?;
          }
          write!(f, "{e}")?;
        }
        Ok(())
      }
      Error::Runtime(e) => write!(f, "{e}"),
    }
  }
}

impl std::error::Error for Error {}

impl From<CompileError> for Error {
  fn from(e: CompileError) -> Self {
    Error::Compile(vec![e])
  }
}

impl From<Vec<CompileError>> for Error {
  fn from(errors: Vec<CompileError>) -> Self {
    Error::Compile(errors)
  }
}

impl From<RuntimeError> for Error {
  fn from(e: RuntimeError) -> Self {
    Error::Runtime(e)
  }
}

/// Where, relative to the offending token, a compile error points.
#[derive(Debug, Clone)]
pub enum At {
  /// The error token already carries its own description (a scan error).
  Nothing,
  End,
  Lexeme(String),
}

#[derive(Debug, Clone)]
pub struct CompileError {
  pub line: u32,
  pub at: At,
  pub message: String,
}

impl fmt::Display for CompileError {
  /// Exact wire format required by §6: `[line N] Error<at>: <message>`.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[line {}] Error", self.line)?;
    match &self.at {
      At::Nothing => {}
      At::End => write!(f, " at end")?,
      At::Lexeme(s) => write!(f, " at '{s}'")?,
    }
    write!(f, ": {}", self.message)
  }
}

#[derive(Debug, Clone)]
pub struct TraceFrame {
  pub line: u32,
  /// `None` for the implicit top-level script frame.
  pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
  pub message: String,
  /// Innermost frame first, matching the order the VM unwinds in.
  pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
  pub fn new(message: impl Into<String>) -> Self {
    RuntimeError {
      message: message.into(),
      trace: Vec::new(),
    }
  }
}

impl fmt::Display for RuntimeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{}", self.message)?;
    for (i, frame) in self.trace.iter().enumerate() {
      if i > 0 {
        writeln!(f)?;
      }
      match &frame.name {
        Some(name) => write!(f, "[line {}] in {name}()", frame.line)?,
        None => write!(f, "[line {}] in script", frame.line)?,
      }
    }
    Ok(())
  }
}

impl std::error::Error for RuntimeError {}

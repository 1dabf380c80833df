//! Interactive prompt (§6): each line of input is a whole program, run
//! against one long-lived [`Vela`] instance. Unlike the teacher's
//! `examples/cli/repl.rs`, there is no multi-line continuation buffering --
//! this language's grammar has no construct that spans a blank-terminated
//! block, so "one line in, one program" is enough.

use rustyline::error::ReadlineError;
use rustyline::Editor;

use crate::Vela;

pub fn run() -> rustyline::Result<()> {
  let vm = Vela::new();
  let mut editor = Editor::<()>::new()?;

  println!("Vela REPL v{}", env!("CARGO_PKG_VERSION"));
  println!("Press CTRL-D to exit");

  loop {
    match editor.readline("> ") {
      Ok(line) => {
        editor.add_history_entry(line.as_str());
        if let Err(e) = vm.eval(&line) {
          eprintln!("{e}");
        }
      }
      Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => return Ok(()),
      Err(e) => return Err(e),
    }
  }
}

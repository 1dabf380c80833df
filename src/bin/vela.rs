//! CLI entry point (§6): no args starts the interactive prompt, one
//! argument runs a script file, more than one is a usage error. Argument
//! parsing follows the teacher's `clap::Parser` convention
//! (`examples/jprochazk-hebi/cli/src/main.rs`), kept deliberately thin since
//! this front end is an external collaborator, not engineering core.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use vela::Vela;

#[derive(Parser, Debug)]
#[clap(name = "vela", version, about = "A small class-based, dynamically-typed scripting language")]
struct Args {
  /// Script to run. With none given, starts an interactive prompt.
  paths: Vec<PathBuf>,

  /// Print the compiled bytecode instead of running it.
  #[clap(long)]
  disassemble: bool,
}

fn main() -> ExitCode {
  let args = Args::parse();
  match args.paths.as_slice() {
    [] => run_repl(),
    [path] => run_file(path, args.disassemble),
    _ => {
      eprintln!("Usage: vela [script]");
      ExitCode::from(64)
    }
  }
}

fn run_repl() -> ExitCode {
  match vela::repl::run() {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{e}");
      ExitCode::from(70)
    }
  }
}

fn run_file(path: &Path, disassemble: bool) -> ExitCode {
  let src = match std::fs::read_to_string(path) {
    Ok(src) => src,
    Err(e) => {
      eprintln!("Can't open file \"{}\": {e}", path.display());
      return ExitCode::from(74);
    }
  };

  if disassemble {
    return disassemble_file(&src);
  }

  let vm = Vela::new();
  match vm.eval(&src) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("{e}");
      ExitCode::from(e.exit_code() as u8)
    }
  }
}

fn disassemble_file(src: &str) -> ExitCode {
  let mut gc = vela::gc::Gc::new();
  match vela::compiler::compile(&mut gc, src) {
    Ok(function) => {
      let chunk = &gc.get(function).as_function().unwrap().chunk;
      let mut out = String::new();
      let _ = vela::disasm::disassemble(chunk, &gc, "script", &mut out);
      print!("{out}");
      ExitCode::SUCCESS
    }
    Err(errors) => {
      for e in &errors {
        eprintln!("{e}");
      }
      ExitCode::from(65)
    }
  }
}

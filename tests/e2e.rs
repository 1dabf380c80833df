//! End-to-end language scenarios (§8), grounded in the teacher's own
//! integration-style suite under `src/tests/*.rs`, adapted from `insta`
//! snapshots (dropped, see DESIGN.md) to direct `assert_eq!` against
//! captured stdout -- small enough here that a snapshot harness buys
//! nothing.

use std::io::Write;
use std::sync::{Arc, Mutex};

use indoc::indoc;
use vela::Vela;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.lock().unwrap().write(buf)
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

impl SharedBuffer {
  fn contents(&self) -> String {
    String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
  }
}

fn run(src: &str) -> (SharedBuffer, vela::Result<()>) {
  let buffer = SharedBuffer::default();
  let vm = Vela::builder().with_io(buffer.clone()).build();
  let result = vm.eval(src);
  (buffer, result)
}

#[test]
fn fibonacci() {
  let (out, result) = run(indoc! {r#"
    fun fib(n) {
      if (n < 2) return n;
      return fib(n - 2) + fib(n - 1);
    }
    print fib(10);
  "#});
  result.unwrap();
  assert_eq!(out.contents(), "55\n");
}

#[test]
fn closure_counter() {
  let (out, result) = run(indoc! {r#"
    fun mk() {
      var i = 0;
      fun next() {
        i = i + 1;
        return i;
      }
      return next;
    }
    var c = mk();
    print c();
    print c();
    print c();
  "#});
  result.unwrap();
  assert_eq!(out.contents(), "1\n2\n3\n");
}

#[test]
fn string_interning_and_concat() {
  let (out, result) = run(r#"print "foo" + "bar" == "foobar";"#);
  result.unwrap();
  assert_eq!(out.contents(), "true\n");
}

#[test]
fn inheritance_and_super() {
  let (out, result) = run(indoc! {r#"
    class A {
      m() { return "A"; }
    }
    class B < A {
      m() { return super.m() + "B"; }
    }
    print B().m();
  "#});
  result.unwrap();
  assert_eq!(out.contents(), "AB\n");
}

#[test]
fn initializer_and_fields() {
  let (out, result) = run(indoc! {r#"
    class P {
      init(x) { this.x = x; }
    }
    var p = P(7);
    print p.x;
    p.x = "s";
    print p.x;
  "#});
  result.unwrap();
  assert_eq!(out.contents(), "7\ns\n");
}

#[test]
fn compile_error_with_recovery_reports_and_does_not_run() {
  let (out, result) = run(indoc! {r#"
    var a = ;
    var b = 2;
    print b;
  "#});
  let err = result.unwrap_err();
  assert_eq!(err.exit_code(), 65);
  assert_eq!(out.contents(), "");
}

#[test]
fn initializer_with_bare_return_yields_fresh_instance() {
  let (out, result) = run(indoc! {r#"
    class C {
      init() { return; }
    }
    print type(C());
  "#});
  result.unwrap();
  assert_eq!(out.contents(), "instance\n");
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
  let (_out, result) = run(indoc! {r#"
    fun f(a, b) { return a + b; }
    f(1);
  "#});
  let err = result.unwrap_err();
  assert_eq!(err.exit_code(), 70);
}

#[test]
fn clock_native_returns_a_number() {
  let (out, result) = run(r#"print type(clock());"#);
  result.unwrap();
  assert_eq!(out.contents(), "number\n");
}

#[test]
fn read_local_in_own_initializer_is_a_compile_error() {
  let (out, result) = run(indoc! {r#"
    var a = 1;
    {
      var a = a;
    }
  "#});
  let err = result.unwrap_err();
  assert_eq!(err.exit_code(), 65);
  assert_eq!(out.contents(), "");
}

#[test]
fn two_closures_share_one_upvalue() {
  let (out, result) = run(indoc! {r#"
    class Pair {}

    fun make_pair() {
      var count = 0;
      fun inc() {
        count = count + 1;
        return count;
      }
      fun read() {
        return count;
      }
      var p = Pair();
      p.inc = inc;
      p.read = read;
      return p;
    }

    var p = make_pair();
    print p.read();
    print p.inc();
    print p.read();
  "#});
  result.unwrap();
  assert_eq!(out.contents(), "0\n1\n1\n");
}

#[test]
fn runtime_error_leaves_vm_usable_for_next_eval() {
  let buffer = SharedBuffer::default();
  let vm = Vela::builder().with_io(buffer.clone()).build();
  assert!(vm.eval("var x = 1 + nil;").is_err());
  vm.eval("print 42;").unwrap();
  assert_eq!(buffer.contents(), "42\n");
}

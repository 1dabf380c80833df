//! Bytecode disassembler: a debugging aid, deliberately thin.
//!
//! Shape (`Instruction`/`Disassembly`, both rendered through `Display`) is
//! grounded on the teacher's `src/bytecode/disasm.rs`, adapted from its
//! variable-length constant-pool bytecode to this VM's fixed-width opcodes.

use std::fmt;

use crate::chunk::{Chunk, OpCode};
use crate::gc::Gc;

struct Instruction {
  offset: usize,
  line: u32,
  name: &'static str,
  operand: Option<String>,
  size: usize,
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04} {:>5} {}", self.offset, self.line, self.name)?;
    if let Some(operand) = &self.operand {
      write!(f, " {operand}")?;
    }
    Ok(())
  }
}

fn decode(chunk: &Chunk, gc: &Gc, offset: usize) -> Instruction {
  let byte = chunk.code[offset];
  let line = chunk.line_at(offset);
  let op = match OpCode::from_u8(byte) {
    Some(op) => op,
    None => {
      return Instruction {
        offset,
        line,
        name: "UNKNOWN",
        operand: Some(byte.to_string()),
        size: 1,
      }
    }
  };

  let simple = |name| Instruction {
    offset,
    line,
    name,
    operand: None,
    size: 1,
  };

  let with_byte_operand = |name, label: &str| {
    let arg = chunk.code[offset + 1];
    Instruction {
      offset,
      line,
      name,
      operand: Some(format!("{label}{arg}")),
      size: 2,
    }
  };

  let with_jump = |name| {
    let hi = chunk.code[offset + 1];
    let lo = chunk.code[offset + 2];
    let jump = u16::from_le_bytes([hi, lo]);
    Instruction {
      offset,
      line,
      name,
      operand: Some(jump.to_string()),
      size: 3,
    }
  };

  let with_constant = |name| {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    let rendered = match value.as_object() {
      Some(r) => match gc.get(r).as_string() {
        Some(s) => format!("{index} '{}'", s.as_str()),
        None => format!("{index} <{}>", gc.get(r).type_name()),
      },
      None => format!("{index} '{value}'"),
    };
    Instruction {
      offset,
      line,
      name,
      operand: Some(rendered),
      size: 2,
    }
  };

  match op {
    OpCode::Constant => with_constant("OP_CONSTANT"),
    OpCode::Nil => simple("OP_NIL"),
    OpCode::True => simple("OP_TRUE"),
    OpCode::False => simple("OP_FALSE"),
    OpCode::Pop => simple("OP_POP"),
    OpCode::GetLocal => with_byte_operand("OP_GET_LOCAL", "slot="),
    OpCode::SetLocal => with_byte_operand("OP_SET_LOCAL", "slot="),
    OpCode::GetUpvalue => with_byte_operand("OP_GET_UPVALUE", "idx="),
    OpCode::SetUpvalue => with_byte_operand("OP_SET_UPVALUE", "idx="),
    OpCode::GetGlobal => with_constant("OP_GET_GLOBAL"),
    OpCode::DefineGlobal => with_constant("OP_DEFINE_GLOBAL"),
    OpCode::SetGlobal => with_constant("OP_SET_GLOBAL"),
    OpCode::GetProperty => with_constant("OP_GET_PROPERTY"),
    OpCode::SetProperty => with_constant("OP_SET_PROPERTY"),
    OpCode::GetSuper => with_constant("OP_GET_SUPER"),
    OpCode::Equal => simple("OP_EQUAL"),
    OpCode::Greater => simple("OP_GREATER"),
    OpCode::Less => simple("OP_LESS"),
    OpCode::Add => simple("OP_ADD"),
    OpCode::Subtract => simple("OP_SUBTRACT"),
    OpCode::Multiply => simple("OP_MULTIPLY"),
    OpCode::Divide => simple("OP_DIVIDE"),
    OpCode::Not => simple("OP_NOT"),
    OpCode::Negate => simple("OP_NEGATE"),
    OpCode::Print => simple("OP_PRINT"),
    OpCode::Jump => with_jump("OP_JUMP"),
    OpCode::JumpIfFalse => with_jump("OP_JUMP_IF_FALSE"),
    OpCode::Loop => with_jump("OP_LOOP"),
    OpCode::Call => with_byte_operand("OP_CALL", "argc="),
    OpCode::Invoke => {
      let name_index = chunk.code[offset + 1];
      let arg_count = chunk.code[offset + 2];
      Instruction {
        offset,
        line,
        name: "OP_INVOKE",
        operand: Some(format!("{name_index} argc={arg_count}")),
        size: 3,
      }
    }
    OpCode::SuperInvoke => {
      let name_index = chunk.code[offset + 1];
      let arg_count = chunk.code[offset + 2];
      Instruction {
        offset,
        line,
        name: "OP_SUPER_INVOKE",
        operand: Some(format!("{name_index} argc={arg_count}")),
        size: 3,
      }
    }
    OpCode::Closure => {
      let index = chunk.code[offset + 1];
      let value = chunk.constants[index as usize];
      let upvalue_count = value
        .as_object()
        .and_then(|r| gc.get(r).as_function())
        .map(|f| f.upvalue_count)
        .unwrap_or(0);
      Instruction {
        offset,
        line,
        name: "OP_CLOSURE",
        operand: Some(format!("{index} ({upvalue_count} upvalues)")),
        size: 2 + upvalue_count * 2,
      }
    }
    OpCode::CloseUpvalue => simple("OP_CLOSE_UPVALUE"),
    OpCode::Return => simple("OP_RETURN"),
    OpCode::Class => with_constant("OP_CLASS"),
    OpCode::Inherit => simple("OP_INHERIT"),
    OpCode::Method => with_constant("OP_METHOD"),
  }
}

/// Renders every instruction in `chunk` to `out`, one per line.
pub fn disassemble(chunk: &Chunk, gc: &Gc, name: &str, out: &mut impl fmt::Write) -> fmt::Result {
  writeln!(out, "== {name} ==")?;
  let mut offset = 0;
  while offset < chunk.len() {
    let instruction = decode(chunk, gc, offset);
    writeln!(out, "{instruction}")?;
    offset += instruction.size;
  }
  Ok(())
}

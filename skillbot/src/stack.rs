//! The shared call stack and the skill stack that runs alongside it.
//!
//! A call pushes five entries: return index, saved `fout`, saved `fin`, output
//! name and argument name. The callee pops the argument name on entry, so a
//! frame at rest is four entries. Returns pop the remaining four in reverse.

use crate::errors::SkillError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StackEntry {
    Address(usize),
    Value(Value),
    Name(String),
}

/// A frame after the argument name has been consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub return_to: usize,
    pub fout: Value,
    pub fin: Value,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub struct CallStack {
    entries: Vec<StackEntry>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn push_call(&mut self, return_to: usize, fout: Value, fin: Value, output: &str, arg: &str) {
        self.entries.push(StackEntry::Address(return_to));
        self.entries.push(StackEntry::Value(fout));
        self.entries.push(StackEntry::Value(fin));
        self.entries.push(StackEntry::Name(output.to_string()));
        self.entries.push(StackEntry::Name(arg.to_string()));
    }

    /// Consume the argument name on callee entry.
    pub fn pop_arg(&mut self, at: usize) -> Result<String, SkillError> {
        match self.entries.pop() {
            Some(StackEntry::Name(name)) => Ok(name),
            _ => Err(SkillError::StackUnderflow(at)),
        }
    }

    pub fn pop_frame(&mut self, at: usize) -> Result<CallFrame, SkillError> {
        if self.entries.len() < 4 {
            return Err(SkillError::StackUnderflow(at));
        }
        let output = match self.entries.pop() {
            Some(StackEntry::Name(name)) => name,
            _ => return Err(SkillError::StackUnderflow(at)),
        };
        let fin = match self.entries.pop() {
            Some(StackEntry::Value(v)) => v,
            _ => return Err(SkillError::StackUnderflow(at)),
        };
        let fout = match self.entries.pop() {
            Some(StackEntry::Value(v)) => v,
            _ => return Err(SkillError::StackUnderflow(at)),
        };
        let return_to = match self.entries.pop() {
            Some(StackEntry::Address(i)) => i,
            _ => return Err(SkillError::StackUnderflow(at)),
        };
        Ok(CallFrame {
            return_to,
            fout,
            fin,
            output,
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillFrame {
    pub name: String,
    /// Call stack length once the skill's frame is at rest.
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SkillStack {
    frames: Vec<SkillFrame>,
}

impl SkillStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, depth: usize) {
        self.frames.push(SkillFrame {
            name: name.to_string(),
            depth,
        });
    }

    pub fn pop(&mut self) -> Option<SkillFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&SkillFrame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.frames.iter().map(|f| f.name.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

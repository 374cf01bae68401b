//! Address resolution: turns a skill document (plus the sub-skills it uses)
//! into one linear program with every control-flow target made explicit.

use crate::errors::SkillError;
use crate::skill::{skill_key, RawStep, SkillDocument, SkillLibrary};
use crate::steps::{
    CallFunctionArgs, CheckConditionArgs, ExceptionHandlerArgs, GotoArgs, OverloadSkillArgs,
    RepeatArgs, ReturnArgs, StubArgs, UseSkillArgs,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info, instrument};

/// Dispatcher index meaning "program done".
pub const SENTINEL: usize = 1_000_000_000;

/// Where an instruction came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub skill: String,
    pub step: u64,
    /// Inserted by the resolver rather than authored.
    pub synthetic: bool,
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.synthetic {
            write!(f, "{}!step {}+", self.skill, self.step)
        } else {
            write!(f, "{}!step {}", self.skill, self.step)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StubKind {
    StartSkill { name: String },
    EndSkill { name: String },
    StartFunction { name: String, param: String },
    EndFunction { name: String },
    Else,
    EndCondition,
    EndLoop,
    Break,
    Tag { name: String },
    /// Any other label; executes as a no-op.
    Label(String),
}

impl StubKind {
    fn from_args(args: &StubArgs) -> Self {
        let name = args.func_name.clone();
        match args.stub_name.trim() {
            "else" => StubKind::Else,
            "end condition" => StubKind::EndCondition,
            "end loop" => StubKind::EndLoop,
            "break" => StubKind::Break,
            "start function" => StubKind::StartFunction {
                name,
                param: args.fargs.clone(),
            },
            "end function" => StubKind::EndFunction { name },
            "end skill" => StubKind::EndSkill { name },
            "tag" => StubKind::Tag { name },
            other if other.starts_with("start skill") => StubKind::StartSkill { name },
            other => StubKind::Label(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Op {
    CheckCondition {
        condition: String,
        if_else: usize,
        if_end: usize,
    },
    /// Counted when `until` is empty: runs while `counter < count`.
    Repeat {
        until: String,
        count: String,
        counter: String,
        end: usize,
    },
    Goto {
        target: usize,
        /// Counter bumped before jumping back to a counted loop.
        increment: Option<String>,
    },
    Stub(StubKind),
    CallFunction {
        name: String,
        entry: usize,
        param: String,
        arg: String,
        output: String,
    },
    Return {
        value: String,
    },
    UseSkill {
        name: String,
        entry: usize,
        arg: String,
        output: String,
    },
    OverloadSkill {
        name: String,
        entry: usize,
        arg: String,
        output: String,
    },
    /// Entered only by recovery; fall-through jumps to `end`.
    ExceptionHandler {
        args: ExceptionHandlerArgs,
        end: usize,
    },
    EndException,
    /// End of the main document.
    Finish,
    /// Every other step type, dispatched by name at run time.
    Action {
        kind: String,
        args: Value,
    },
}

impl Op {
    pub fn kind(&self) -> &str {
        match self {
            Op::CheckCondition { .. } => "Check Condition",
            Op::Repeat { .. } => "Repeat",
            Op::Goto { .. } => "Goto",
            Op::Stub(_) => "Stub",
            Op::CallFunction { .. } => "Call Function",
            Op::Return { .. } => "Return",
            Op::UseSkill { .. } => "Use Skill",
            Op::OverloadSkill { .. } => "Overload Skill",
            Op::ExceptionHandler { .. } => "Exception Handler",
            Op::EndException => "End Exception",
            Op::Finish => "Finish",
            Op::Action { kind, .. } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub address: Address,
    pub op: Op,
}

/// Index range one document occupies in the program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSpan {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Program {
    pub name: String,
    pub skid: String,
    pub instructions: Vec<Instruction>,
    /// Function name to entry index.
    pub functions: BTreeMap<String, usize>,
    /// Skill name to entry index.
    pub skills: BTreeMap<String, usize>,
    /// Document name to the index of its Exception Handler step.
    pub exception_handlers: BTreeMap<String, usize>,
    pub documents: Vec<DocumentSpan>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Document that owns `index`.
    pub fn document_at(&self, index: usize) -> Option<&DocumentSpan> {
        self.documents
            .iter()
            .find(|d| index >= d.start && index < d.end)
    }

    /// Exception Handler for the document owning `index`, else the main one.
    pub fn exception_handler_for(&self, index: usize) -> Option<usize> {
        self.document_at(index)
            .and_then(|d| self.exception_handlers.get(&d.name))
            .or_else(|| {
                self.documents
                    .first()
                    .and_then(|d| self.exception_handlers.get(&d.name))
            })
            .copied()
    }
}

enum Open {
    Cond { at: usize, else_at: Option<usize> },
    Loop { at: usize, breaks: Vec<usize> },
    Function { at: usize },
    Skill,
}

impl Open {
    fn at(&self) -> Option<usize> {
        match self {
            Open::Cond { at, .. } | Open::Loop { at, .. } | Open::Function { at } => Some(*at),
            Open::Skill => None,
        }
    }
}

enum Pending {
    Goto { label: String },
    Function { name: String },
    Skill { key: String },
}

struct Resolver<'a> {
    library: &'a SkillLibrary,
    instructions: Vec<Instruction>,
    documents: Vec<DocumentSpan>,
    /// Per document: step number to first instruction index.
    labels: Vec<HashMap<u64, usize>>,
    tags: Vec<HashMap<String, usize>>,
    functions: Vec<HashMap<String, (usize, String)>>,
    skills: BTreeMap<String, usize>,
    exception_handlers: BTreeMap<String, usize>,
    pending: Vec<(usize, usize, Pending)>,
}

impl<'a> Resolver<'a> {
    fn new(library: &'a SkillLibrary) -> Self {
        Self {
            library,
            instructions: Vec::new(),
            documents: Vec::new(),
            labels: Vec::new(),
            tags: Vec::new(),
            functions: Vec::new(),
            skills: BTreeMap::new(),
            exception_handlers: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    fn step_name(&self, index: usize) -> String {
        self.instructions
            .get(index)
            .map(|i| i.address.to_string())
            .unwrap_or_else(|| format!("#{index}"))
    }

    fn push(&mut self, doc: &SkillDocument, step: &RawStep, op: Op, synthetic: bool) -> usize {
        self.instructions.push(Instruction {
            address: Address {
                skill: doc.name.clone(),
                step: step.number,
                synthetic,
            },
            op,
        });
        self.instructions.len() - 1
    }

    /// Emit one document's steps with unresolved targets. Returns the skill
    /// keys it references.
    fn emit(&mut self, doc: &SkillDocument) -> Result<Vec<String>, SkillError> {
        let doc_idx = self.documents.len();
        let start = self.instructions.len();
        let mut labels = HashMap::new();
        let mut referenced = Vec::new();

        for step in &doc.steps {
            let first = self.instructions.len();
            labels.insert(step.number, first);

            match step.kind.as_str() {
                "Check Condition" => {
                    let args: CheckConditionArgs = step.args()?;
                    self.push(
                        doc,
                        step,
                        Op::CheckCondition {
                            condition: args.condition,
                            if_else: SENTINEL,
                            if_end: SENTINEL,
                        },
                        false,
                    );
                }
                "Repeat" => {
                    let args: RepeatArgs = step.args()?;
                    let counted = args.until.trim().is_empty();
                    if counted && args.count.trim().is_empty() {
                        return Err(SkillError::InvalidStep {
                            step: step.key.clone(),
                            reason: "Repeat needs either 'until' or 'count'".into(),
                        });
                    }
                    let counter = if args.lc_name.trim().is_empty() {
                        format!("lc_{}_{}", doc_idx, step.number)
                    } else {
                        args.lc_name.trim().to_string()
                    };
                    if counted {
                        // hidden counter initialisation ahead of the loop test
                        self.push(
                            doc,
                            step,
                            Op::Action {
                                kind: "Fill Data".into(),
                                args: json!({
                                    "type": "Fill Data",
                                    "fill_type": "direct",
                                    "from": 0,
                                    "to": counter,
                                    "result": ""
                                }),
                            },
                            true,
                        );
                    }
                    self.push(
                        doc,
                        step,
                        Op::Repeat {
                            until: args.until,
                            count: args.count,
                            counter,
                            end: SENTINEL,
                        },
                        false,
                    );
                }
                "Goto" => {
                    let args: GotoArgs = step.args()?;
                    let at = self.push(
                        doc,
                        step,
                        Op::Goto {
                            target: SENTINEL,
                            increment: None,
                        },
                        false,
                    );
                    self.pending.push((at, doc_idx, Pending::Goto { label: args.goto }));
                }
                "Stub" => {
                    let args: StubArgs = step.args()?;
                    self.push(doc, step, Op::Stub(StubKind::from_args(&args)), false);
                }
                "Call Function" => {
                    let args: CallFunctionArgs = step.args()?;
                    let at = self.push(
                        doc,
                        step,
                        Op::CallFunction {
                            name: args.fname.clone(),
                            entry: SENTINEL,
                            param: String::new(),
                            arg: args.fargs,
                            output: args.output,
                        },
                        false,
                    );
                    self.pending
                        .push((at, doc_idx, Pending::Function { name: args.fname }));
                }
                "Return" => {
                    let args: ReturnArgs = step.args()?;
                    self.push(
                        doc,
                        step,
                        Op::Return {
                            value: args.val_var_name,
                        },
                        false,
                    );
                }
                "Use Skill" => {
                    let args: UseSkillArgs = step.args()?;
                    let key = skill_key(&args.skill_path, &args.skill_name);
                    let at = self.push(
                        doc,
                        step,
                        Op::UseSkill {
                            name: key.clone(),
                            entry: SENTINEL,
                            arg: args.skill_args,
                            output: args.output,
                        },
                        false,
                    );
                    referenced.push(key.clone());
                    self.pending.push((at, doc_idx, Pending::Skill { key }));
                }
                "Overload Skill" => {
                    let args: OverloadSkillArgs = step.args()?;
                    let key = args.skill_name.trim_matches('/').to_string();
                    let at = self.push(
                        doc,
                        step,
                        Op::OverloadSkill {
                            name: key.clone(),
                            entry: SENTINEL,
                            arg: args.args,
                            output: args.output,
                        },
                        false,
                    );
                    referenced.push(key.clone());
                    self.pending.push((at, doc_idx, Pending::Skill { key }));
                }
                "Exception Handler" => {
                    let args: ExceptionHandlerArgs = step.args()?;
                    let at = self.push(
                        doc,
                        step,
                        Op::ExceptionHandler {
                            args,
                            end: SENTINEL,
                        },
                        false,
                    );
                    self.exception_handlers.entry(doc.name.clone()).or_insert(at);
                }
                "End Exception" => {
                    self.push(doc, step, Op::EndException, false);
                }
                _ => {
                    self.push(
                        doc,
                        step,
                        Op::Action {
                            kind: step.kind.clone(),
                            args: Value::Object(step.fields.clone()),
                        },
                        false,
                    );
                }
            }
        }

        let end = self.instructions.len();
        self.skills.entry(doc.name.clone()).or_insert(start);
        self.documents.push(DocumentSpan {
            name: doc.name.clone(),
            start,
            end,
        });
        self.labels.push(labels);
        self.tags.push(HashMap::new());
        self.functions.push(HashMap::new());
        debug!("Emitted '{}' at [{}, {})", doc.name, start, end);
        Ok(referenced)
    }

    fn set_goto(&mut self, at: usize, target: usize, increment: Option<String>) {
        self.instructions[at].op = Op::Goto { target, increment };
    }

    /// Match stubs against the constructs they close, one document at a time.
    fn link_document(&mut self, doc_idx: usize) -> Result<(), SkillError> {
        let DocumentSpan { start, end, .. } = self.documents[doc_idx].clone();
        let mut open: Vec<Open> = Vec::new();
        let mut handler: Option<usize> = None;

        for i in start..end {
            let op = self.instructions[i].op.clone();
            match op {
                Op::CheckCondition { .. } => open.push(Open::Cond { at: i, else_at: None }),
                Op::Repeat { .. } => open.push(Open::Loop {
                    at: i,
                    breaks: Vec::new(),
                }),
                Op::Stub(StubKind::Else) => match open.last_mut() {
                    Some(Open::Cond { at, else_at }) if else_at.is_none() => {
                        if let Op::CheckCondition { if_else, .. } = &mut self.instructions[*at].op {
                            *if_else = i + 1;
                        }
                        *else_at = Some(i);
                    }
                    _ => return Err(self.unmatched("else", i)),
                },
                Op::Stub(StubKind::EndCondition) => match open.pop() {
                    Some(Open::Cond { at, else_at }) => {
                        if let Op::CheckCondition { if_else, if_end, .. } =
                            &mut self.instructions[at].op
                        {
                            *if_end = i + 1;
                            if else_at.is_none() {
                                *if_else = i + 1;
                            }
                        }
                        if let Some(e) = else_at {
                            self.set_goto(e, i + 1, None);
                        }
                        self.set_goto(i, i + 1, None);
                    }
                    _ => return Err(self.unmatched("end condition", i)),
                },
                Op::Stub(StubKind::Break) => {
                    let mut found = false;
                    for construct in open.iter_mut().rev() {
                        match construct {
                            Open::Loop { breaks, .. } => {
                                breaks.push(i);
                                found = true;
                                break;
                            }
                            Open::Cond { .. } => continue,
                            Open::Function { .. } | Open::Skill => break,
                        }
                    }
                    if !found {
                        return Err(self.unmatched("break", i));
                    }
                }
                Op::Stub(StubKind::EndLoop) => match open.pop() {
                    Some(Open::Loop { at, breaks }) => {
                        let mut increment = None;
                        if let Op::Repeat {
                            end, until, counter, ..
                        } = &mut self.instructions[at].op
                        {
                            *end = i + 1;
                            if until.trim().is_empty() {
                                increment = Some(counter.clone());
                            }
                        }
                        self.set_goto(i, at, increment);
                        for b in breaks {
                            self.set_goto(b, i + 1, None);
                        }
                    }
                    _ => return Err(self.unmatched("end loop", i)),
                },
                Op::Stub(StubKind::StartFunction { name, param }) => {
                    self.functions[doc_idx]
                        .entry(name)
                        .or_insert((i + 1, param));
                    open.push(Open::Function { at: i });
                }
                Op::Stub(StubKind::EndFunction { .. }) => match open.pop() {
                    Some(Open::Function { at }) => {
                        // falling into a definition skips its body
                        self.set_goto(at, i + 1, None);
                    }
                    _ => return Err(self.unmatched("end function", i)),
                },
                Op::Stub(StubKind::StartSkill { name }) => {
                    let doc_name = self.documents[doc_idx].name.clone();
                    self.skills.insert(doc_name, i + 1);
                    if !name.is_empty() {
                        self.skills.entry(name).or_insert(i + 1);
                    }
                    open.push(Open::Skill);
                }
                Op::Stub(StubKind::EndSkill { .. }) => {
                    if matches!(open.last(), Some(Open::Skill)) {
                        open.pop();
                    } else if let Some(at) = open.last().and_then(Open::at) {
                        return Err(SkillError::UnclosedConstruct {
                            step: self.step_name(at),
                        });
                    }
                }
                Op::ExceptionHandler { .. } => handler = Some(i),
                Op::EndException => {
                    let Some(at) = handler.take() else {
                        return Err(self.unmatched("End Exception", i));
                    };
                    if let Op::ExceptionHandler { end, .. } = &mut self.instructions[at].op {
                        *end = i + 1;
                    }
                }
                Op::Stub(StubKind::Tag { name }) => {
                    self.tags[doc_idx].insert(name, i);
                }
                _ => {}
            }
        }

        if let Some(at) = handler {
            return Err(SkillError::UnclosedConstruct {
                step: self.step_name(at),
            });
        }
        if let Some(construct) = open.iter().find(|c| !matches!(c, Open::Skill)) {
            let at = construct.at().unwrap_or(start);
            return Err(SkillError::UnclosedConstruct {
                step: self.step_name(at),
            });
        }
        Ok(())
    }

    fn unmatched(&self, stub: &str, at: usize) -> SkillError {
        SkillError::UnmatchedStub {
            stub: stub.to_string(),
            step: self.step_name(at),
        }
    }

    fn lookup_function(&self, doc_idx: usize, name: &str) -> Option<(usize, String)> {
        self.functions[doc_idx]
            .get(name)
            .or_else(|| self.functions.iter().find_map(|f| f.get(name)))
            .cloned()
    }

    fn lookup_label(&self, doc_idx: usize, label: &str) -> Option<usize> {
        let label = label.rsplit('!').next().unwrap_or(label).trim();
        let number = crate::skill::parse_step_key(label).or_else(|| label.parse().ok());
        if let Some(n) = number {
            return self.labels[doc_idx].get(&n).copied();
        }
        self.tags[doc_idx]
            .get(label)
            .or_else(|| self.tags.iter().find_map(|t| t.get(label)))
            .copied()
    }

    fn resolve_pending(&mut self) -> Result<(), SkillError> {
        let pending = std::mem::take(&mut self.pending);
        for (at, doc_idx, what) in pending {
            match what {
                Pending::Goto { label } => {
                    let target = self.lookup_label(doc_idx, &label).ok_or_else(|| {
                        SkillError::UnknownLabel {
                            target: label.clone(),
                            step: self.step_name(at),
                        }
                    })?;
                    self.set_goto(at, target, None);
                }
                Pending::Function { name } => {
                    let (target, param_name) = self
                        .lookup_function(doc_idx, &name)
                        .ok_or_else(|| SkillError::MissingFunction(name.clone()))?;
                    if let Op::CallFunction { entry, param, .. } = &mut self.instructions[at].op {
                        *entry = target;
                        *param = param_name;
                    }
                }
                Pending::Skill { key } => {
                    let target = *self
                        .skills
                        .get(&key)
                        .ok_or_else(|| SkillError::MissingSkill(key.clone()))?;
                    match &mut self.instructions[at].op {
                        Op::UseSkill { entry, .. } | Op::OverloadSkill { entry, .. } => {
                            *entry = target
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}

/// Resolve `main` and every skill it reaches through `library` into one program.
#[instrument(skip_all, fields(skill = %main.name))]
pub fn resolve(main: &SkillDocument, library: &SkillLibrary) -> Result<Program, SkillError> {
    let mut resolver = Resolver::new(library);
    let mut queue: VecDeque<String> = resolver.emit(main)?.into();

    // end of the main document; sub-skills follow and run only when called
    let finish_at = resolver.instructions.len();
    resolver.instructions.push(Instruction {
        address: Address {
            skill: main.name.clone(),
            step: main.steps.last().map(|s| s.number).unwrap_or(0),
            synthetic: true,
        },
        op: Op::Finish,
    });
    resolver.documents[0].end = finish_at + 1;

    let mut seen: Vec<String> = vec![main.name.clone()];
    if !main.header.name.is_empty() {
        seen.push(main.header.name.clone());
        resolver.skills.entry(main.header.name.clone()).or_insert(0);
    }

    while let Some(key) = queue.pop_front() {
        if seen.contains(&key) {
            continue;
        }
        let doc = resolver
            .library
            .get(&key)
            .ok_or_else(|| SkillError::MissingSkill(key.clone()))?;
        seen.push(key.clone());
        seen.push(doc.name.clone());
        let referenced = resolver.emit(doc)?;
        // a sub-skill that runs off its last step returns to its caller
        let at = resolver.instructions.len();
        resolver.instructions.push(Instruction {
            address: Address {
                skill: doc.name.clone(),
                step: doc.steps.last().map(|s| s.number).unwrap_or(0),
                synthetic: true,
            },
            op: Op::Stub(StubKind::EndSkill {
                name: doc.name.clone(),
            }),
        });
        if let Some(span) = resolver.documents.last_mut() {
            span.end = at + 1;
        }
        // also reachable by the key it was requested under
        let entry = resolver.skills[&doc.name];
        resolver.skills.entry(key).or_insert(entry);
        queue.extend(referenced);
    }

    for doc_idx in 0..resolver.documents.len() {
        resolver.link_document(doc_idx)?;
    }
    resolver.resolve_pending()?;

    let mut functions = BTreeMap::new();
    for table in &resolver.functions {
        for (name, (entry, _)) in table {
            functions.entry(name.clone()).or_insert(*entry);
        }
    }

    info!(
        "Resolved '{}' into {} instructions ({} documents, {} functions)",
        main.name,
        resolver.instructions.len(),
        resolver.documents.len(),
        functions.len()
    );

    Ok(Program {
        name: if main.header.name.is_empty() {
            main.name.clone()
        } else {
            main.header.name.clone()
        },
        skid: main.header.skid.clone(),
        instructions: resolver.instructions,
        functions,
        skills: resolver.skills,
        exception_handlers: resolver.exception_handlers,
        documents: resolver.documents,
    })
}

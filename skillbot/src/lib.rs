//! Skill interpreter
//!
//! Loads skill documents (ordered `step <N>` records), resolves their control
//! flow into a linear program and runs it against a shared symbol table, a
//! call stack and a rollback-and-retry recovery layer. Screens, desktops and
//! networks are reached only through the collaborator traits in [`platforms`].

pub mod config;
pub mod errors;
pub mod expression;
mod handlers;
pub mod interpreter;
pub mod platforms;
pub mod program;
pub mod recovery;
pub mod report;
pub mod skill;
pub mod stack;
pub mod steps;
pub mod symbols;
pub mod types;

pub use config::RunConfig;
pub use errors::{ExprError, PlatformError, SkillError};
pub use interpreter::{Interpreter, MissionHandle};
pub use platforms::Collaborators;
pub use program::{resolve, Address, Instruction, Op, Program, SENTINEL};
pub use recovery::RecoveryConfig;
pub use report::{MissionCommand, MissionProgress, MissionReport, MissionStatus, StepStatus};
pub use skill::{SkillDocument, SkillHeader, SkillLibrary};
pub use symbols::SymbolTable;
pub use types::{BoundBox, ClickKind, Point, ScreenRecord, WindowInfo, WindowRect};

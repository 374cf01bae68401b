use thiserror::Error;

/// Structural failures. These abort loading, resolution or a run.
#[derive(Error, Debug)]
pub enum SkillError {
    #[error("Malformed skill document: {0}")]
    MalformedSkill(String),

    #[error("Invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("Unmatched stub '{stub}' at {step}")]
    UnmatchedStub { stub: String, step: String },

    #[error("Construct opened at {step} is never closed")]
    UnclosedConstruct { step: String },

    #[error("Function not found: {0}")]
    MissingFunction(String),

    #[error("Skill not found: {0}")]
    MissingSkill(String),

    #[error("Unknown step type '{kind}' at {step}")]
    UnknownStepType { kind: String, step: String },

    #[error("Unknown goto target '{target}' at {step}")]
    UnknownLabel { target: String, step: String },

    #[error("Call stack underflow at step {0}")]
    StackUnderflow(usize),

    #[error("Program ended with {0} entries left on the call stack")]
    NonEmptyCallStack(usize),

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures raised while parsing or evaluating an embedded expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Name is not defined: {0}")]
    UndefinedName(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid assignment target: {0}")]
    InvalidTarget(String),
}

/// Failures reported by desktop, screen, network and scraper collaborators.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),
}

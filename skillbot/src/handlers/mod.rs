//! Step handlers. Each returns the next instruction index; failures that are
//! not structural become a tagged `StepStatus::Failed` and the dispatcher
//! moves on.

mod control;
mod data;
mod input;
mod screen;

use crate::errors::{ExprError, PlatformError, SkillError};
use crate::expression::{self, AssignOp};
use crate::interpreter::Interpreter;
use crate::program::Op;
use crate::report::StepStatus;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

pub(crate) struct Outcome {
    pub next: usize,
    pub status: StepStatus,
}

/// Why a handler could not finish its step.
#[derive(Error, Debug)]
pub(crate) enum StepFailure {
    #[error(transparent)]
    Structural(#[from] SkillError),

    #[error("{0}")]
    Expression(#[from] ExprError),

    #[error("{0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid arguments: {0}")]
    Arguments(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),
}

pub(crate) type HandlerResult = Result<usize, StepFailure>;

pub(crate) fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, StepFailure> {
    Ok(serde_json::from_value(args.clone())?)
}

/// Empty strings and nulls count as "not given".
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// A list of strings from a JSON list, a comma separated string, or one value.
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(expression::to_display_string).collect(),
        Value::String(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        other => vec![expression::to_display_string(other)],
    }
}

/// Negative seconds clamp to zero; infinite or oversized values fail the step.
pub(crate) fn duration_from_secs(secs: f64) -> Result<Duration, StepFailure> {
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|e| StepFailure::Invalid(format!("cannot wait {secs} seconds: {e}")))
}

impl Interpreter {
    pub(crate) async fn dispatch(&mut self, index: usize) -> Result<Outcome, SkillError> {
        let op = self.program.instructions[index].op.clone();
        let kind = op.kind().to_string();

        // where control goes when the handler fails
        let fallback = match &op {
            Op::CheckCondition { if_else, .. } => *if_else,
            Op::Repeat { end, .. } => *end,
            _ => index + 1,
        };

        let result = match op {
            Op::CheckCondition {
                condition, if_else, ..
            } => self.check_condition(index, &condition, if_else),
            Op::Repeat {
                until,
                count,
                counter,
                end,
            } => self.repeat(index, &until, &count, &counter, end),
            Op::Goto { target, increment } => self.goto(target, increment.as_deref()),
            Op::Stub(stub) => self.stub(index, &stub),
            Op::CallFunction {
                name,
                entry,
                param,
                arg,
                output,
            } => self.call_function(index, &name, entry, &param, &arg, &output),
            Op::Return { value } => self.return_from(index, &value),
            Op::UseSkill {
                name,
                entry,
                arg,
                output,
            }
            | Op::OverloadSkill {
                name,
                entry,
                arg,
                output,
            } => self.use_skill(index, &name, entry, &arg, &output),
            Op::ExceptionHandler { args, end } => self.exception_handler(index, &args, end).await,
            Op::EndException => self.end_exception(index),
            Op::Finish => Ok(crate::program::SENTINEL),
            Op::Action { kind, args } => self.action(index, &kind, &args).await,
        };

        match result {
            Ok(next) => Ok(Outcome {
                next,
                status: StepStatus::Completed,
            }),
            Err(StepFailure::Structural(e)) => Err(e),
            Err(failure) => {
                let status = StepStatus::failed(&kind, index, &failure);
                error!("{}", status);
                Ok(Outcome {
                    next: fallback,
                    status,
                })
            }
        }
    }

    async fn action(&mut self, index: usize, kind: &str, args: &Value) -> HandlerResult {
        match kind {
            "Halt" => self.halt(index, args),
            "Create Data" => self.create_data(index, args),
            "Fill Data" => self.fill_data(index, args),
            "Load Data" => self.load_data(index, args),
            "Save Data" => self.save_data(index, args),
            "List Dir" => self.list_dir(index, args),
            "Check Existence" => self.check_existence(index, args),
            "Text To Number" => self.text_to_number(index, args),
            "Call Extern" => self.call_extern(index, args).await,
            "Wait" => self.wait(index, args).await,
            "Wait Until" => self.wait_until(index, args).await,
            "Create Dir" => self.create_dir(index, args),
            "Read File" => self.read_file(index, args),
            "Write File" => self.write_file(index, args),
            "Delete File" => self.delete_file(index, args),
            "Extract Info" => self.extract_info(index, args).await,
            "Save Html" => self.save_html(index, args).await,
            "Search" | "Search Anchor Info" => self.search(index, args).await,
            "Search Word Line" => self.search_word_line(index, args),
            "Search Scroll" => self.search_scroll(index, args).await,
            "Text Line Location Record" => self.text_line_location(index, args),
            "Calibrate Scroll" => self.calibrate_scroll(index, args),
            "Mouse Click" => self.mouse_click(index, args).await,
            "Mouse Move" => self.mouse_move(index, args).await,
            "Mouse Scroll" => self.mouse_scroll(index, args).await,
            "Key Input" => self.key_input(index, args).await,
            "Text Input" => self.text_input(index, args).await,
            "Open App" | "App Open" => self.open_app(index, args).await,
            "Get Windows Info" => self.get_windows_info(index, args).await,
            "Bring Window To Front" => self.bring_window_to_front(index, args).await,
            other => {
                let op = self
                    .collaborators
                    .external
                    .get(other)
                    .cloned()
                    .ok_or_else(|| SkillError::UnknownStepType {
                        kind: other.to_string(),
                        step: index.to_string(),
                    })?;
                op.run(args, &mut self.symbols).await?;
                Ok(index + 1)
            }
        }
    }

    /// Evaluate `source` if it is an expression string, else take the literal.
    pub(crate) fn value_of(&mut self, source: &Value) -> Result<Value, StepFailure> {
        match source {
            Value::String(s) => Ok(self.symbols.evaluate(s)?),
            other => Ok(other.clone()),
        }
    }

    /// A number given literally, as numeric text, or as an expression.
    pub(crate) fn number_of(&mut self, source: &Value) -> Result<Option<f64>, StepFailure> {
        if is_blank(source) {
            return Ok(None);
        }
        if let Some(n) = source.as_f64() {
            return Ok(Some(n));
        }
        if let Some(s) = source.as_str() {
            if let Ok(n) = s.trim().parse::<f64>() {
                return Ok(Some(n));
            }
        }
        let value = self.value_of(source)?;
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(if b { 1.0 } else { 0.0 })),
            other => other
                .as_f64()
                .map(Some)
                .ok_or_else(|| StepFailure::Invalid(format!("not a number: {other}"))),
        }
    }

    pub(crate) fn seconds_of(&mut self, source: &Value) -> Result<Duration, StepFailure> {
        let secs = self.number_of(source)?.unwrap_or(0.0);
        duration_from_secs(secs)
    }

    /// Uniform draw from `[lo, hi)`; `lo` when the range is empty.
    pub(crate) fn random_between(&mut self, lo: f64, hi: f64) -> Result<f64, StepFailure> {
        if lo.is_nan() || hi.is_nan() || hi <= lo {
            return Ok(lo);
        }
        if !(hi - lo).is_finite() {
            return Err(StepFailure::Invalid(format!(
                "random range {lo}..{hi} is not finite"
            )));
        }
        Ok(self.rng.gen_range(lo..hi))
    }

    /// Current value of an assignment target such as `cart["items"][0]`.
    pub(crate) fn read_target(&mut self, target: &str) -> Result<Value, StepFailure> {
        Ok(self.symbols.evaluate(target)?)
    }

    pub(crate) fn write_target(&mut self, target: &str, value: Value) -> Result<(), StepFailure> {
        let target = expression::parse_target(target)?;
        expression::assign(&target, AssignOp::Set, value, &mut self.symbols)?;
        Ok(())
    }

    /// Bind `name` when the step asked for an output.
    pub(crate) fn store(&mut self, name: &str, value: Value) -> Result<(), StepFailure> {
        if name.trim().is_empty() {
            return Ok(());
        }
        self.write_target(name.trim(), value)
    }

    pub(crate) async fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

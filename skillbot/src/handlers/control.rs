use super::{parse_args, HandlerResult, StepFailure};
use crate::errors::SkillError;
use crate::interpreter::Interpreter;
use crate::program::{StubKind, SENTINEL};
use crate::recovery::{retry_until_reachable, RetryOutcome};
use crate::steps::ExceptionHandlerArgs;
use crate::symbols::{FIN, FOUT, MISSION_FAILED};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct HaltArgs {
    #[serde(default)]
    reason: String,
}

impl Interpreter {
    pub(crate) fn check_condition(
        &mut self,
        index: usize,
        condition: &str,
        if_else: usize,
    ) -> HandlerResult {
        let truth = self.symbols.evaluate_condition(condition)?;
        debug!("Condition '{}' at {} is {}", condition, index, truth);
        Ok(if truth { index + 1 } else { if_else })
    }

    pub(crate) fn repeat(
        &mut self,
        index: usize,
        until: &str,
        count: &str,
        counter: &str,
        end: usize,
    ) -> HandlerResult {
        if !until.trim().is_empty() {
            let go_on = self.symbols.evaluate_condition(until)?;
            return Ok(if go_on { index + 1 } else { end });
        }

        let limit = self
            .number_of(&Value::String(count.to_string()))?
            .unwrap_or(0.0);
        let current = self
            .symbols
            .value(counter)
            .as_f64()
            .ok_or_else(|| StepFailure::Invalid(format!("loop counter '{counter}' is not a number")))?;
        debug!("Loop {} at {}: {} of {}", counter, index, current, limit);
        Ok(if current < limit { index + 1 } else { end })
    }

    pub(crate) fn goto(&mut self, target: usize, increment: Option<&str>) -> HandlerResult {
        if let Some(counter) = increment {
            let next = self.symbols.value(counter).as_i64().unwrap_or(0) + 1;
            self.symbols.set(counter, Value::from(next));
        }
        Ok(target)
    }

    pub(crate) fn stub(&mut self, index: usize, stub: &StubKind) -> HandlerResult {
        match stub {
            StubKind::EndFunction { .. } => {
                let value = self.symbols.value(FOUT);
                Ok(self.unwind_frame(index, value)?)
            }
            StubKind::EndSkill { name } => {
                if self.skills.is_empty() {
                    info!("End of skill '{}' with empty skill stack; done", name);
                    return Ok(SENTINEL);
                }
                let value = self.symbols.value(FOUT);
                Ok(self.unwind_frame(index, value)?)
            }
            _ => Ok(index + 1),
        }
    }

    /// Push a frame and enter a callee at `entry`, binding `fin` to the argument.
    fn enter(&mut self, index: usize, entry: usize, arg: &str, output: &str) -> Result<Value, SkillError> {
        let fin = self.symbols.value(FIN);
        let fout = self.symbols.value(FOUT);
        self.calls.push_call(index + 1, fout, fin, output, arg);

        let arg_name = self.calls.pop_arg(index)?;
        let value = if arg_name.trim().is_empty() {
            Value::Null
        } else {
            self.symbols.value(arg_name.trim())
        };
        self.symbols.set(FIN, value.clone());
        debug!("Enter {} from {} with fin={}", entry, index, value);
        Ok(value)
    }

    /// Pop one frame, restore `fin`/`fout`, bind the output and return there.
    fn unwind_frame(&mut self, index: usize, value: Value) -> Result<usize, SkillError> {
        if self
            .skills
            .top()
            .is_some_and(|frame| frame.depth == self.calls.len())
        {
            if let Some(frame) = self.skills.pop() {
                debug!("Leaving skill '{}'", frame.name);
            }
        }

        let frame = self.calls.pop_frame(index)?;
        self.symbols.set(FIN, frame.fin);
        self.symbols.set(FOUT, frame.fout);
        if !frame.output.trim().is_empty() {
            self.symbols.declare(frame.output.trim(), value);
        }
        Ok(frame.return_to)
    }

    pub(crate) fn call_function(
        &mut self,
        index: usize,
        name: &str,
        entry: usize,
        param: &str,
        arg: &str,
        output: &str,
    ) -> HandlerResult {
        let value = self.enter(index, entry, arg, output)?;
        if !param.trim().is_empty() {
            self.symbols.set(param.trim(), value);
        }
        info!("Call function '{}' -> {}", name, entry);
        Ok(entry)
    }

    pub(crate) fn return_from(&mut self, index: usize, value_name: &str) -> HandlerResult {
        let value = if value_name.trim().is_empty() {
            self.symbols.value(FOUT)
        } else {
            self.symbols.evaluate(value_name)?
        };
        Ok(self.unwind_frame(index, value)?)
    }

    pub(crate) fn use_skill(
        &mut self,
        index: usize,
        name: &str,
        entry: usize,
        arg: &str,
        output: &str,
    ) -> HandlerResult {
        self.enter(index, entry, arg, output)?;
        self.skills.push(name, self.calls.len());
        info!("Use skill '{}' -> {} (depth {})", name, entry, self.skills.len());
        Ok(entry)
    }

    pub(crate) async fn exception_handler(
        &mut self,
        index: usize,
        args: &ExceptionHandlerArgs,
        end: usize,
    ) -> HandlerResult {
        if !self.handling {
            return Ok(end);
        }

        let policy = self.recovery.config.policy_for(Some(args));
        info!(
            "Exception handler at {} (cause '{}'): up to {} retries against {}",
            index, args.cause, policy.max_retries, policy.site
        );
        let outcome =
            retry_until_reachable(self.collaborators.ping.as_ref(), &mut self.rng, &policy).await;
        match outcome {
            RetryOutcome::Reconnected { .. } => {
                self.collaborators.desktop.refresh_page().await?;
                self.symbols.set_flag(crate::symbols::NET_CONNECTED, true);
                Ok(index + 1)
            }
            RetryOutcome::Exhausted { attempts } => {
                // the block's own `mission_failed` guards do the cleanup
                self.mark_failed(format!(
                    "{} unreachable after {} attempts",
                    policy.site, attempts
                ));
                Ok(index + 1)
            }
        }
    }

    pub(crate) fn end_exception(&mut self, index: usize) -> HandlerResult {
        if !self.handling {
            return Ok(index + 1);
        }
        if self.symbols.flag(MISSION_FAILED) {
            info!("End exception after a failed mission; stopping");
            self.unwind();
            return Ok(SENTINEL);
        }
        let frame = self.recovery.roll_back(&mut self.symbols);
        let closed = self.recovery.resolve(&mut self.symbols);
        self.handling = false;
        let next = match (frame, closed) {
            (Some(frame), _) => frame.address,
            (None, Some(descriptor)) => descriptor.raised_at,
            (None, None) => index + 1,
        };
        info!("End exception; resuming at {}", next);
        Ok(next)
    }

    pub(crate) fn halt(&mut self, index: usize, args: &Value) -> HandlerResult {
        let args: HaltArgs = parse_args(args)?;
        if args.reason.is_empty() {
            warn!("Halt at {}", index);
        } else {
            warn!("Halt at {}: {}", index, args.reason);
        }
        Ok(index + 1)
    }
}

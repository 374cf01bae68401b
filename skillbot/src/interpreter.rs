//! The step dispatcher.
//!
//! One instruction runs to completion before the next is fetched. Between
//! steps the dispatcher drains mission commands, checks the cancellation token
//! and, when `in_exception` is set, diverts into recovery.

use crate::config::RunConfig;
use crate::errors::SkillError;
use crate::platforms::Collaborators;
use crate::program::{resolve, Op, Program, SENTINEL};
use crate::recovery::{retry_until_reachable, RecoveryLayer, RetryOutcome};
use crate::report::{MissionCommand, MissionProgress, MissionReport, MissionStatus, StepStatus};
use crate::skill::{SkillDocument, SkillLibrary};
use crate::stack::{CallStack, SkillStack};
use crate::steps::BUILTIN_STEP_TYPES;
use crate::symbols::{SymbolTable, IN_EXCEPTION, MISSION_FAILED, SCROLL_RESOLUTION};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Remote control for a running mission.
#[derive(Debug, Clone)]
pub struct MissionHandle {
    commands: mpsc::UnboundedSender<MissionCommand>,
    cancel: CancellationToken,
}

impl MissionHandle {
    /// Stop before the next step.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let _ = self.commands.send(MissionCommand::Cancel);
    }

    pub fn pause(&self) -> bool {
        self.commands.send(MissionCommand::Pause).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.commands.send(MissionCommand::Resume).is_ok()
    }

    /// Progress as of the next step boundary; `None` once the mission is gone.
    pub async fn status(&self) -> Option<MissionProgress> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(MissionCommand::Status(tx)).ok()?;
        rx.await.ok()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

pub struct Interpreter {
    pub(crate) program: Program,
    pub(crate) symbols: SymbolTable,
    pub(crate) calls: CallStack,
    pub(crate) skills: SkillStack,
    pub(crate) recovery: RecoveryLayer,
    pub(crate) collaborators: Collaborators,
    pub(crate) config: RunConfig,
    pub(crate) rng: StdRng,
    pub(crate) index: usize,
    /// Set while running the steps of an Exception Handler block.
    pub(crate) handling: bool,
    steps_executed: u64,
    last_error: Option<String>,
    paused: bool,
    commands: Option<mpsc::UnboundedReceiver<MissionCommand>>,
    pub(crate) cancel: CancellationToken,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("program", &self.program.name)
            .field("index", &self.index)
            .field("steps_executed", &self.steps_executed)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Fails with `UnknownStepType` if a step is neither built in nor
    /// registered in `collaborators.external`.
    pub fn new(
        program: Program,
        collaborators: Collaborators,
        config: RunConfig,
    ) -> Result<Self, SkillError> {
        for instruction in &program.instructions {
            if let Op::Action { kind, .. } = &instruction.op {
                let known = BUILTIN_STEP_TYPES.contains(&kind.as_str())
                    || collaborators.external.contains_key(kind);
                if !known {
                    return Err(SkillError::UnknownStepType {
                        kind: kind.clone(),
                        step: instruction.address.to_string(),
                    });
                }
            }
        }

        let mut symbols = SymbolTable::new();
        symbols.set(SCROLL_RESOLUTION, Value::from(config.scroll_resolution));

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            program,
            symbols,
            calls: CallStack::new(),
            skills: SkillStack::new(),
            recovery: RecoveryLayer::new(config.recovery.clone()),
            collaborators,
            config,
            rng,
            index: 0,
            handling: false,
            steps_executed: 0,
            last_error: None,
            paused: false,
            commands: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Resolve `main` against `library` and build an interpreter for it.
    pub fn for_skill(
        main: &SkillDocument,
        library: &SkillLibrary,
        collaborators: Collaborators,
        config: RunConfig,
    ) -> Result<Self, SkillError> {
        let program = resolve(main, library)?;
        Self::new(program, collaborators, config)
    }

    /// Create the control channel for this mission. Calling it again replaces
    /// the previous channel.
    pub fn handle(&mut self) -> MissionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(rx);
        MissionHandle {
            commands: tx,
            cancel: self.cancel.clone(),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.calls
    }

    pub fn skill_stack(&self) -> &SkillStack {
        &self.skills
    }

    pub fn recovery(&self) -> &RecoveryLayer {
        &self.recovery
    }

    pub fn recovery_mut(&mut self) -> &mut RecoveryLayer {
        &mut self.recovery
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Position the dispatcher, e.g. to resume a mission mid-way in tests.
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn steps_executed(&self) -> u64 {
        self.steps_executed
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn is_done(&self) -> bool {
        self.index >= SENTINEL || self.index >= self.program.len()
    }

    fn progress(&self) -> MissionProgress {
        MissionProgress {
            index: self.index,
            address: self
                .program
                .get(self.index)
                .map(|i| i.address.to_string())
                .unwrap_or_else(|| "end".to_string()),
            steps_executed: self.steps_executed,
            paused: self.paused,
            last_error: self.last_error.clone(),
        }
    }

    /// Handle queued commands. Blocks while paused. Returns true on cancel.
    async fn drain_commands(&mut self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return true;
            }
            let Some(mut rx) = self.commands.take() else {
                return false;
            };

            let command = if self.paused {
                let received = tokio::select! {
                    cmd = rx.recv() => Some(cmd),
                    _ = self.cancel.cancelled() => None,
                };
                match received {
                    Some(cmd) => cmd,
                    None => {
                        self.commands = Some(rx);
                        return true;
                    }
                }
            } else {
                match rx.try_recv() {
                    Ok(cmd) => Some(cmd),
                    Err(mpsc::error::TryRecvError::Empty) => {
                        self.commands = Some(rx);
                        return false;
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => None,
                }
            };
            self.commands = Some(rx);

            match command {
                Some(MissionCommand::Cancel) => return true,
                Some(MissionCommand::Pause) => {
                    if !self.paused {
                        info!("Mission paused at step {}", self.index);
                    }
                    self.paused = true;
                }
                Some(MissionCommand::Resume) => {
                    if self.paused {
                        info!("Mission resumed at step {}", self.index);
                    }
                    self.paused = false;
                }
                Some(MissionCommand::Status(reply)) => {
                    let _ = reply.send(self.progress());
                }
                None => {
                    // every handle dropped; nobody can resume us
                    self.commands = None;
                    self.paused = false;
                    return false;
                }
            }
        }
    }

    /// Run one step at `self.index` and advance.
    pub async fn tick(&mut self) -> Result<StepStatus, SkillError> {
        let index = self.index;
        let Some(instruction) = self.program.get(index) else {
            self.index = SENTINEL;
            return Ok(StepStatus::Completed);
        };
        info!(
            "Step {} BEGIN type='{}' address='{}'",
            index,
            instruction.op.kind(),
            instruction.address
        );

        let outcome = self.dispatch(index).await?;
        self.steps_executed += 1;

        if let StepStatus::Failed(tag) = &outcome.status {
            self.last_error = Some(tag.clone());
        }
        info!("Step {} END status={}", index, outcome.status);
        self.index = outcome.next;
        Ok(outcome.status)
    }

    /// Built-in recovery for documents without an Exception Handler step:
    /// reconnect, refresh, roll back, resume.
    pub async fn recover(&mut self) -> Result<(), SkillError> {
        let policy = self.recovery.config.policy_for(None);
        let outcome =
            retry_until_reachable(self.collaborators.ping.as_ref(), &mut self.rng, &policy).await;
        match outcome {
            RetryOutcome::Reconnected { .. } => {
                self.reconnected().await;
                Ok(())
            }
            RetryOutcome::Exhausted { attempts } => {
                self.fail_mission(format!(
                    "{} unreachable after {} attempts",
                    policy.site, attempts
                ));
                Ok(())
            }
        }
    }

    /// Refresh the page, restore the newest rollback point and resume there.
    pub(crate) async fn reconnected(&mut self) {
        if let Err(e) = self.collaborators.desktop.refresh_page().await {
            warn!("Page refresh failed: {}", e);
        }
        self.symbols.set_flag(crate::symbols::NET_CONNECTED, true);
        let frame = self.recovery.roll_back(&mut self.symbols);
        let closed = self.recovery.resolve(&mut self.symbols);
        self.handling = false;
        self.index = match (frame, closed) {
            (Some(frame), _) => frame.address,
            (None, Some(descriptor)) => descriptor.raised_at,
            (None, None) => self.index,
        };
        info!("Recovered; resuming at step {}", self.index);
    }

    /// Set `mission_failed` and keep the reason for the report.
    pub(crate) fn mark_failed(&mut self, reason: String) {
        error!("Mission failed: {}", reason);
        self.symbols.set_flag(MISSION_FAILED, true);
        self.last_error = Some(reason);
    }

    /// Mark the mission failed and unwind to the outermost skill's end.
    pub(crate) fn fail_mission(&mut self, reason: String) {
        self.mark_failed(reason);
        self.unwind();
    }

    pub(crate) fn unwind(&mut self) {
        self.calls.clear();
        self.skills.clear();
        self.recovery.clear_exceptions(&mut self.symbols);
        self.handling = false;
        self.index = SENTINEL;
    }

    /// Run until the program ends, the mission fails or it is cancelled.
    #[instrument(skip_all, fields(skill = %self.program.name))]
    pub async fn run(&mut self) -> Result<MissionReport, SkillError> {
        let started = Instant::now();
        let mut status = MissionStatus::Completed;
        info!(
            "Mission '{}' (skid '{}') starting with {} instructions",
            self.program.name,
            self.program.skid,
            self.program.len()
        );

        while !self.is_done() {
            if self.drain_commands().await {
                warn!("Mission cancelled at step {}", self.index);
                self.unwind();
                status = MissionStatus::Cancelled;
                break;
            }

            if let Some(limit) = self.config.max_steps {
                if self.steps_executed >= limit {
                    self.fail_mission(format!("step budget of {limit} exhausted"));
                    break;
                }
            }

            if self.symbols.flag(IN_EXCEPTION) && !self.handling {
                match self.program.exception_handler_for(self.index) {
                    Some(handler) => {
                        info!("In exception; entering handler at step {}", handler);
                        self.handling = true;
                        self.index = handler;
                    }
                    None => {
                        self.recover().await?;
                        continue;
                    }
                }
            }

            self.tick().await?;
        }

        if status == MissionStatus::Completed && self.symbols.flag(MISSION_FAILED) {
            status = MissionStatus::Failed;
        }
        if status == MissionStatus::Completed && !self.calls.is_empty() {
            return Err(SkillError::NonEmptyCallStack(self.calls.len()));
        }

        let report = MissionReport {
            skill: self.program.name.clone(),
            status,
            steps_executed: self.steps_executed,
            last_error: self.last_error.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Mission '{}' finished: {:?} after {} steps",
            report.skill, report.status, report.steps_executed
        );
        Ok(report)
    }
}

//! Iteration Orchestrator (C8): wires every other component into the
//! bootstrap -> blueprint preflight -> plan-first -> iterate -> fix-errors
//! -> finalize run loop, driven by the kernel's [`RunState`] transition
//! table so the control flow itself stays unit-testable apart from this
//! crate's I/O.

use std::path::{Path, PathBuf};
use std::time::Duration;

use codeloop_kernel::conversation::Conversation;
use codeloop_kernel::error::RunError;
use codeloop_kernel::patch::{self, PatchPayload, PatchStatus};
use codeloop_kernel::plan::{self, FileClass, IterationPlan};
use codeloop_kernel::ports::{
    AgentPort, AgentRequest, CancelToken, CommandPort, EventSink, FsPort, RunEvent, SchedulerStore,
    VcsPort,
};
use codeloop_kernel::resume::{self, ResumeRecord};
use codeloop_kernel::scheduler::{RunBudget, RunState, Transition};

use crate::blueprint;
use crate::state::{FileStateStore, INITIAL_PLAN_NAME, REVIEW_PLAN_NAME, STATE_SUBDIR};
use crate::walker;

/// A verification command the error-fix loop runs after each iteration.
/// Kept as a single shell line (not pre-split into program+args) since
/// `CommandPort` hands it to a subshell verbatim.
#[derive(Debug, Clone)]
pub struct VerifyCommand {
    pub line: String,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    pub repo_root: PathBuf,
    pub instructions: String,
    pub branch_prefix: String,
    pub verify_command: Option<VerifyCommand>,
    pub command_timeout: Duration,
    pub conversation_window_pairs: usize,
    pub budget: RunBudget,
    pub manifest_max_lines: Option<usize>,
    pub blueprint_goal: String,
    /// Remote to push the final branch to once the run reaches `Done`;
    /// `None` skips pushing entirely (`--no-push`).
    pub push_remote: Option<String>,
    /// Overrides the plan-first step's `estimated_iterations` with a fixed
    /// count (`--iterations`), bypassing the model's own estimate.
    pub forced_iterations: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_state: RunState,
    pub iterations_completed: u32,
    pub final_head: Option<String>,
    pub pushed: bool,
}

pub struct Orchestrator<'a> {
    fs: &'a dyn FsPort,
    vcs: &'a dyn VcsPort,
    agent: &'a dyn AgentPort,
    command: &'a dyn CommandPort,
    events: &'a dyn EventSink,
    cancel: CancelToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        fs: &'a dyn FsPort,
        vcs: &'a dyn VcsPort,
        agent: &'a dyn AgentPort,
        command: &'a dyn CommandPort,
        events: &'a dyn EventSink,
        cancel: CancelToken,
    ) -> Self {
        Orchestrator {
            fs,
            vcs,
            agent,
            command,
            events,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), RunError> {
        if self.cancel.is_cancelled() {
            return Err(RunError::BudgetExceeded("run cancelled".to_string()));
        }
        Ok(())
    }

    async fn submit(&self, conversation: &Conversation, window_pairs: usize) -> Result<String, RunError> {
        self.check_cancelled()?;
        let turns = conversation.windowed(window_pairs);
        let response = self.agent.submit(AgentRequest { turns }).await?;
        Ok(response.raw_text)
    }

    /// Requests and applies patches from the model until it reports
    /// `status: completed`, committing each applied patch individually so a
    /// crash mid-iteration leaves a clean history up to the last success.
    ///
    /// `allowed` restricts which [`FileClass`]es this call may write;
    /// attempting to touch a disallowed class is fed back to the model as a
    /// retryable precondition failure rather than silently applied.
    async fn patch_cycle(
        &self,
        conversation: &mut Conversation,
        state: &FileStateStore<'_>,
        repo_root: &Path,
        run_id: &str,
        last_resume: &mut Option<ResumeRecord>,
        allowed: &[FileClass],
        max_turns: u32,
        window_pairs: usize,
    ) -> Result<(), RunError> {
        let mut turns_spent = 0u32;
        let mut last_precondition_failure: Option<String> = None;
        loop {
            if turns_spent >= max_turns {
                return Err(RunError::BudgetExceeded(format!(
                    "patch turn cap ({max_turns}) reached"
                )));
            }
            turns_spent += 1;

            let raw = self.submit(conversation, window_pairs).await?;
            conversation.push_assistant(raw.clone());

            let payload = match patch::validate(&raw) {
                Ok(p) => p,
                Err(e) => {
                    let err: RunError = e.into();
                    conversation.push_user(format!(
                        "Your last reply was rejected: {err}. Reply with exactly one \
                         corrected patch envelope."
                    ));
                    continue;
                }
            };

            if let Err(reason) = check_class_allowed(&payload, allowed) {
                conversation.push_user(format!(
                    "Your last reply was rejected: {reason}. Reply with exactly one \
                     corrected patch envelope."
                ));
                continue;
            }

            match crate::apply::apply(self.fs, self.vcs, repo_root, &payload) {
                Ok(outcome) => {
                    last_precondition_failure = None;
                    self.events.emit(RunEvent::PatchValidated {
                        op: payload.op_name().to_string(),
                        path: payload.primary_path().to_string(),
                    });
                    if !outcome.touched.is_empty() {
                        let message = format!("{}: {}", payload.op_name(), payload.primary_path());
                        let commit = self.vcs.commit(&message)?;
                        self.events.emit(RunEvent::PatchApplied {
                            op: payload.op_name().to_string(),
                            path: payload.primary_path().to_string(),
                        });
                        if let Some(head) = commit.or(self.vcs.head_sha()?) {
                            // `step_index` must increase monotonically across
                            // the whole run, not reset with each call's own
                            // turn counter — chain off the last record this
                            // run actually wrote, if any.
                            let record = match last_resume.as_ref() {
                                Some(prev) => prev.advanced(payload.primary_path(), head),
                                None => ResumeRecord::new(run_id, payload.primary_path(), head, 0),
                            };
                            state.save(&record)?;
                            *last_resume = Some(record);
                        }
                    }
                }
                Err(RunError::PreconditionFailure { path, reason })
                    if last_precondition_failure.as_deref() == Some(path.as_str()) =>
                {
                    return Err(RunError::BudgetExceeded(format!(
                        "precondition for {path} failed twice in a row ({reason}); giving up \
                         on this iteration"
                    )));
                }
                Err(RunError::PreconditionFailure { path, reason }) => {
                    last_precondition_failure = Some(path.clone());
                    conversation.push_user(format!(
                        "Applying your last patch failed: precondition failed for {path}: \
                         {reason}. Reply with exactly one corrected patch envelope."
                    ));
                    continue;
                }
                Err(e) if e.disposition() == codeloop_kernel::error::Disposition::RetryWithModel => {
                    conversation.push_user(format!(
                        "Applying your last patch failed: {e}. Reply with exactly one \
                         corrected patch envelope."
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            }

            if payload.status() == PatchStatus::Completed {
                return Ok(());
            }
            conversation.push_user("Continue. Reply with the next patch envelope.".to_string());
        }
    }

    /// Runs the verification command and, on failure, drives the error-fix
    /// loop until it succeeds or `max_fix_attempts` is exhausted.
    async fn run_and_fix(
        &self,
        conversation: &mut Conversation,
        state: &FileStateStore<'_>,
        repo_root: &Path,
        run_id: &str,
        last_resume: &mut Option<ResumeRecord>,
        verify: &VerifyCommand,
        max_fix_attempts: u32,
        command_timeout: Duration,
        window_pairs: usize,
    ) -> Result<(), RunError> {
        let mut attempts = 0u32;
        loop {
            self.check_cancelled()?;
            let outcome = self.command.run(&verify.line, repo_root, command_timeout).await;

            let outcome = match outcome {
                Ok(o) => o,
                Err(RunError::CommandTimeout(d)) => {
                    conversation.push_user(format!(
                        "The verification command timed out after {d:?}. Reply with exactly \
                         one patch envelope that addresses a likely hang, or narrow the \
                         suggested command."
                    ));
                    attempts += 1;
                    if attempts >= max_fix_attempts {
                        return Err(RunError::VerificationExhausted {
                            attempts,
                            tail: format!("command timed out after {d:?}"),
                        });
                    }
                    self.patch_cycle(
                        conversation,
                        state,
                        repo_root,
                        run_id,
                        last_resume,
                        &[FileClass::Code, FileClass::Doc, FileClass::Deferred],
                        4,
                        window_pairs,
                    )
                    .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.events.emit(RunEvent::CommandRun {
                command: verify.line.clone(),
                succeeded: outcome.succeeded,
            });

            if outcome.succeeded {
                return Ok(());
            }

            attempts += 1;
            if attempts >= max_fix_attempts {
                return Err(RunError::VerificationExhausted {
                    attempts,
                    tail: outcome.tail.clone(),
                });
            }

            conversation.push_user(format!(
                "`{}` failed (exit {:?}). Output tail:\n\n{}\n\nReply with exactly one \
                 patch envelope that fixes it.",
                verify.line, outcome.exit_code, outcome.tail
            ));
            self.patch_cycle(
                conversation,
                state,
                repo_root,
                run_id,
                last_resume,
                &[FileClass::Code, FileClass::Doc, FileClass::Deferred],
                4,
                window_pairs,
            )
            .await?;
        }
    }

    pub async fn run(&self, cfg: &RunConfig) -> Result<RunOutcome, RunError> {
        let mut run_state = RunState::Bootstrap;
        let state = FileStateStore::new(self.fs, &cfg.repo_root);
        let mut iterations_completed = 0u32;

        // --- Bootstrap ---
        let resumed = resume::reconcile(state.load(&cfg.run_id)?, self.vcs.head_sha()?.as_deref());
        if let Some(record) = &resumed {
            self.events.emit(RunEvent::StepStarted {
                step_id: format!("resume-from:{}", record.last_commit),
            });
        }
        // Chained off by every `patch_cycle`/`run_and_fix` call below so
        // `step_index` increases monotonically across the whole run instead
        // of resetting with each call's own turn counter.
        let mut last_resume = resumed.clone();

        let state_dir = cfg.repo_root.join(STATE_SUBDIR);
        let blueprint_set = blueprint::survey(self.fs, &state_dir);
        run_state = if blueprint_set.all_present() {
            run_state
                .next(&Transition::BlueprintReady)
                .expect("Bootstrap->BlueprintReady is a valid transition")
        } else {
            run_state
                .next(&Transition::BlueprintNeedsScaffold)
                .expect("Bootstrap->BlueprintNeedsScaffold is a valid transition")
        };

        // --- Blueprint preflight ---
        if run_state == RunState::BlueprintPreflight {
            let mut conversation = Conversation::new(system_prompt());
            for kind in blueprint_set.missing() {
                self.check_cancelled()?;
                let repo_relative_file =
                    blueprint::doc_repo_path(Path::new(STATE_SUBDIR), kind);
                let prompt =
                    blueprint::generation_prompt(kind, &cfg.blueprint_goal, &repo_relative_file);
                conversation.push_user(prompt);
                self.patch_cycle(
                    &mut conversation,
                    &state,
                    &cfg.repo_root,
                    &cfg.run_id,
                    &mut last_resume,
                    &[FileClass::Doc],
                    3,
                    cfg.conversation_window_pairs,
                )
                .await?;
            }
            run_state = run_state
                .next(&Transition::PatchApplied)
                .expect("BlueprintPreflight->PlanFirst is a valid transition");
        }

        // --- Plan-first ---
        self.vcs.checkout_branch(&format!("{}-plan", cfg.branch_prefix))?;
        let manifest = walker::manifest(&cfg.repo_root, cfg.manifest_max_lines);
        let manifest_text = walker::render_manifest(&manifest);
        let blueprint_summary = blueprint::survey(self.fs, &state_dir).summary(4096);

        let mut conversation = Conversation::new(system_prompt());
        conversation.push_user(format!(
            "{instructions}\n\nRepository manifest:\n{manifest_text}\n\nBlueprint status:\n\
             {blueprint_summary}\n\nRespond with exactly one JSON plan object: \
             {{\"overview\":...,\"suggested_run_command\":...,\"classifications\":[...],\
             \"estimated_iterations\":1-3}}. Do not include a patch envelope in this turn.",
            instructions = cfg.instructions,
        ));

        let plan_raw = self.submit(&conversation, cfg.conversation_window_pairs).await?;
        conversation.push_assistant(plan_raw.clone());
        let mut iteration_plan = plan::parse_plan_reply(&plan_raw)?;
        if let Some(forced) = cfg.forced_iterations {
            iteration_plan.estimated_iterations = IterationPlan::clamp_estimate(forced);
        }
        state.save_plan(INITIAL_PLAN_NAME, &iteration_plan)?;
        self.events.emit(RunEvent::PlanCreated {
            steps: iteration_plan.estimated_iterations as usize,
        });

        run_state = run_state
            .next(&Transition::PlanProduced {
                estimated_iterations: iteration_plan.estimated_iterations as usize,
            })
            .expect("PlanFirst->Iterating is a valid transition");

        let total_iterations = iteration_plan.estimated_iterations as u32;

        // --- Iteration loop ---
        'iterating: for n in 1..=total_iterations {
            self.check_cancelled()?;
            cfg.budget.check_iterations(iterations_completed)?;

            self.vcs
                .checkout_branch(&format!("{}-{n}", cfg.branch_prefix))?;

            let allowed: Vec<FileClass> = if n == total_iterations {
                vec![FileClass::Code, FileClass::Doc, FileClass::Deferred]
            } else {
                vec![FileClass::Code, FileClass::Doc]
            };

            conversation.push_user(format!(
                "Begin iteration {n} of {total_iterations}. Allowed file classes this \
                 iteration: {allowed:?}. Reply with exactly one patch envelope; set \
                 status to completed once this iteration's work is fully applied."
            ));

            match self
                .patch_cycle(
                    &mut conversation,
                    &state,
                    &cfg.repo_root,
                    &cfg.run_id,
                    &mut last_resume,
                    &allowed,
                    cfg.budget.max_iterations,
                    cfg.conversation_window_pairs,
                )
                .await
            {
                Ok(()) => {}
                Err(e) if e.disposition() == codeloop_kernel::error::Disposition::Graceful => {
                    self.events.emit(RunEvent::StepFailed {
                        step_id: format!("iteration-{n}"),
                        reason: e.to_string(),
                    });
                    iterations_completed += 1;
                    continue 'iterating;
                }
                Err(e) => return Err(e),
            }

            if let Some(verify) = &cfg.verify_command {
                run_state = run_state
                    .next(&Transition::VerificationRequested)
                    .unwrap_or(RunState::RunningCommand);
                match self
                    .run_and_fix(
                        &mut conversation,
                        &state,
                        &cfg.repo_root,
                        &cfg.run_id,
                        &mut last_resume,
                        verify,
                        cfg.budget.max_fix_attempts_per_step,
                        cfg.command_timeout,
                        cfg.conversation_window_pairs,
                    )
                    .await
                {
                    Ok(()) => {
                        run_state = run_state
                            .next(&Transition::CommandSucceeded)
                            .unwrap_or(RunState::Iterating);
                    }
                    Err(e) if e.disposition() == codeloop_kernel::error::Disposition::Graceful => {
                        self.events.emit(RunEvent::StepFailed {
                            step_id: format!("iteration-{n}"),
                            reason: e.to_string(),
                        });
                        run_state = RunState::Iterating;
                        iterations_completed += 1;
                        continue 'iterating;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                run_state = RunState::Iterating;
            }

            self.events.emit(RunEvent::StepVerified {
                step_id: format!("iteration-{n}"),
            });
            iterations_completed += 1;
        }

        run_state = run_state
            .next(&Transition::AllStepsComplete)
            .unwrap_or(RunState::Finalizing);

        // --- Finalize ---
        let review_plan = IterationPlan {
            overview: format!(
                "Completed {iterations_completed}/{total_iterations} planned iteration(s)."
            ),
            suggested_run_command: iteration_plan.suggested_run_command.clone(),
            classifications: iteration_plan.classifications.clone(),
            estimated_iterations: iteration_plan.estimated_iterations,
        };
        state.save_plan(REVIEW_PLAN_NAME, &review_plan)?;

        run_state = run_state
            .next(&Transition::AllStepsComplete)
            .expect("Finalizing->Done is a valid transition");

        let final_head = self.vcs.head_sha()?;

        // Pushing is best-effort relative to the run's own success: a
        // `Done` run with nothing to push (no remote configured) is not a
        // failure, but a rejected/misconfigured push after a `Done` run is
        // fatal, since the point of the run was to land the result.
        let pushed = if run_state == RunState::Done {
            match &cfg.push_remote {
                Some(remote) => {
                    self.vcs.push(remote)?;
                    true
                }
                None => false,
            }
        } else {
            false
        };

        self.events.emit(RunEvent::RunFinished {
            ok: run_state == RunState::Done,
        });

        Ok(RunOutcome {
            final_state: run_state,
            iterations_completed,
            final_head,
            pushed,
        })
    }
}

fn check_class_allowed(payload: &PatchPayload, allowed: &[FileClass]) -> Result<(), String> {
    let path = std::path::Path::new(payload.primary_path());
    let class = walker::classify(path);
    if allowed.contains(&class) {
        Ok(())
    } else {
        Err(format!(
            "{path} is classified {class:?}, which this iteration may not write \
             (allowed: {allowed:?})",
            path = payload.primary_path()
        ))
    }
}

fn system_prompt() -> &'static str {
    "You are driving an automated edit-run-fix loop against a real git repository. \
     Every reply must be exactly one JSON object: either a patch envelope \
     ({\"op\":...,\"file\":...,\"status\":...}) or, for the first turn only, a plan \
     object. No prose, no markdown fences, no text outside the JSON object."
}

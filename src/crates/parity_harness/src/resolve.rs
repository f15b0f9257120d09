//! Drives the live application from "an action was sent" to "ready for the
//! next turn-level action".
//!
//! Each cycle receives one payload and then takes exactly one step chosen by
//! [`decide`]. The loop ends when turn actions are available again, when a
//! receive times out (treated as quiescence), or after
//! [`ResolutionPolicy::max_steps`] cycles.

use std::time::Duration;

use tracing::{debug, warn};

use crate::client::{GameLink, Session};
use crate::config::ResolutionPolicy;
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::Command;
use crate::snapshot::{CombatSnapshot, ScreenType, Snapshot};

/// What to do after absorbing one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Turn-level actions are available; resolution is complete.
    Complete,
    /// Answer a pending prompt.
    Send(Command),
    /// Nothing actionable; re-request state and wait briefly.
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The application reported it is ready for `play` or `end`.
    Ready,
    /// A receive timed out; the last snapshot is taken as final.
    Quiescent,
    /// The step cap was reached before either of the above.
    Exhausted,
}

/// Result of one resolution run.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Last effective snapshot seen, if any.
    pub snapshot: Option<Snapshot>,
    pub outcome: Outcome,
    /// Receive cycles that produced a payload.
    pub steps: usize,
    /// Caller-supplied choices that were consumed.
    pub choices_used: usize,
}

impl Resolution {
    pub fn is_ready(&self) -> bool {
        self.outcome == Outcome::Ready
    }

    pub fn combat(&self) -> Option<&CombatSnapshot> {
        self.snapshot.as_ref().and_then(|snapshot| snapshot.combat.as_ref())
    }
}

/// Caller-supplied answers to `choose` prompts, consumed in order.
#[derive(Debug, Clone, Default)]
pub struct ChoiceQueue {
    choices: Vec<usize>,
    next: usize,
}

impl ChoiceQueue {
    pub fn new(choices: &[usize]) -> Self {
        Self {
            choices: choices.to_vec(),
            next: 0,
        }
    }

    pub fn pop(&mut self) -> Option<usize> {
        let choice = self.choices.get(self.next).copied()?;
        self.next += 1;
        Some(choice)
    }

    pub fn consumed(&self) -> usize {
        self.next
    }

    pub fn remaining(&self) -> usize {
        self.choices.len() - self.next
    }
}

/// Pick the next step from the session flags and the effective snapshot.
///
/// A hand selection screen is answered with `choose 0` while a choice is
/// offered. Once it stops offering one but still shows, it is forced closed
/// with `key confirm`.
pub fn decide(session: &Session, snapshot: Option<&Snapshot>, choices: &mut ChoiceQueue) -> Step {
    let commands = session.commands();
    if session.ready_for_command && commands.can_play_turn() {
        return Step::Complete;
    }

    let hand_select = snapshot
        .map(|snapshot| snapshot.screen_type == ScreenType::HandSelect)
        .unwrap_or(false);

    if commands.has("choose") {
        if let Some(choice) = choices.pop() {
            return Step::Send(Command::Choose(choice));
        }
        if hand_select {
            return Step::Send(Command::Choose(0));
        }
        if let Some(command) = commands.confirm_action() {
            return Step::Send(command);
        }
        return Step::Send(Command::Choose(0));
    }

    if let Some(command) = commands.confirm_action() {
        return Step::Send(command);
    }
    if hand_select {
        return Step::Send(Command::KeyConfirm);
    }
    Step::Probe
}

impl ResolutionPolicy {
    /// Receive timeout to use after taking `step`.
    pub fn timeout_after(&self, step: &Step) -> Duration {
        match step {
            Step::Probe => self.probe_timeout,
            _ => self.responsive_timeout,
        }
    }
}

/// Runs the resolution loop against any [`GameLink`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolver {
    policy: ResolutionPolicy,
}

impl Resolver {
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Resolve whatever was just sent, answering `choose` prompts with
    /// `choices` first.
    ///
    /// Timeouts end the run normally; any other receive or send error is
    /// returned.
    pub fn resolve<L>(&self, link: &mut L, choices: &[usize]) -> HarnessResult<Resolution>
    where
        L: GameLink + ?Sized,
    {
        let mut queue = ChoiceQueue::new(choices);
        let mut snapshot = link.session().last_snapshot.clone();
        let mut timeout = self.policy.responsive_timeout;

        for cycle in 0..self.policy.max_steps {
            match link.wait_for_state(Some(timeout)) {
                Ok(state) => snapshot = state,
                Err(HarnessError::Timeout(waited)) => {
                    debug!(cycle, ?waited, "no further payloads; treating as resolved");
                    return Ok(Resolution {
                        snapshot,
                        outcome: Outcome::Quiescent,
                        steps: cycle,
                        choices_used: queue.consumed(),
                    });
                }
                Err(err) => return Err(err),
            }

            let step = decide(link.session(), snapshot.as_ref(), &mut queue);
            debug!(cycle, ?step, "resolution step");
            match &step {
                Step::Complete => {
                    return Ok(Resolution {
                        snapshot,
                        outcome: Outcome::Ready,
                        steps: cycle + 1,
                        choices_used: queue.consumed(),
                    });
                }
                Step::Send(command) => link.send(command)?,
                Step::Probe => link.send(&Command::State)?,
            }
            timeout = self.policy.timeout_after(&step);
        }

        warn!(
            max_steps = self.policy.max_steps,
            "resolution did not settle; returning last snapshot"
        );
        Ok(Resolution {
            snapshot,
            outcome: Outcome::Exhausted,
            steps: self.policy.max_steps,
            choices_used: queue.consumed(),
        })
    }
}

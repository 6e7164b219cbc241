use std::fmt;

use serde::Serialize;

use crate::core::error::{PanelError, PanelResult};

/// Lifecycle of one supervised module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Idle,
    Starting,
    Ready,
    /// Startup did not succeed; reported, then back to idle.
    Failed,
    Stopping,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Idle => "idle",
            ModuleState::Starting => "starting",
            ModuleState::Ready => "ready",
            ModuleState::Failed => "failed",
            ModuleState::Stopping => "stopping",
        }
    }

    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Ready)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Ready, Stopping)
                | (Failed, Idle)
                | (Stopping, Idle)
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a supervised child ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "code")]
pub enum ExitClassification {
    StoppedByUser,
    ExitedNormally,
    ExitedWithError(Option<i32>),
}

impl ExitClassification {
    pub fn classify(stopped_by_user: bool, success: bool, code: Option<i32>) -> Self {
        if stopped_by_user {
            ExitClassification::StoppedByUser
        } else if success {
            ExitClassification::ExitedNormally
        } else {
            ExitClassification::ExitedWithError(code)
        }
    }
}

/// Everything the supervisor reports, in order, per module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum SupervisorEvent {
    StateChanged {
        module: String,
        from: ModuleState,
        to: ModuleState,
    },
    Ready {
        module: String,
        pid: u32,
        url: String,
        log_path: String,
    },
    StartupFailed {
        module: String,
        kind: String,
        message: String,
    },
    Exited {
        module: String,
        classification: ExitClassification,
    },
    StartupLog {
        module: String,
        text: String,
    },
}

/// The state plus the PID it belongs to. `Ready` always carries the PID
/// recorded while `Starting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMachine {
    state: ModuleState,
    pid: Option<u32>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: ModuleState::Idle,
            pid: None,
        }
    }
}

impl StateMachine {
    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn transition(&mut self, next: ModuleState) -> PanelResult<ModuleState> {
        if !self.state.can_transition_to(next) {
            return Err(PanelError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next == ModuleState::Ready && self.pid.is_none() {
            return Err(PanelError::InvalidTransition {
                from: self.state.to_string(),
                to: "ready without a process".into(),
            });
        }
        let previous = self.state;
        self.state = next;
        if next == ModuleState::Idle {
            self.pid = None;
        }
        Ok(previous)
    }

    /// Attach the spawned child's PID; only meaningful while starting.
    pub fn record_pid(&mut self, pid: u32) -> PanelResult<()> {
        if self.state != ModuleState::Starting {
            return Err(PanelError::InvalidTransition {
                from: self.state.to_string(),
                to: "starting with a process".into(),
            });
        }
        self.pid = Some(pid);
        Ok(())
    }
}

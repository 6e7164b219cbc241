// ─── Supervisor ───
// Cross-instance PID locking, readiness probing and the start/stop
// lifecycle of module processes.

pub mod environment;
pub mod pidfile;
pub mod probe;
pub mod startup_log;
pub mod state;
pub mod task;

pub use pidfile::{lock_file_path, PidFile, PidState};
pub use probe::{precheck_port, probe_url, wait_until_ready, ProbeOutcome};
pub use startup_log::StartupLogTail;
pub use state::{ExitClassification, ModuleState, StateMachine, SupervisorEvent};
pub use task::{
    kill_locking_process, strip_shebang, ExecutableKind, LaunchRequest, RuntimeRequirement,
    StartedModule, Supervisor, SupervisorConfig,
};

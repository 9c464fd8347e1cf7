pub mod exec;
pub mod mock;
pub mod supervisor;

pub use exec::{BoxedExecutor, Executor, HostExecutor};
pub use mock::{ExecCall, MockExecutor};
pub use supervisor::{
    BoxedSupervisor, LaunchMode, ProcManager, ProcessHandle, ProcessSupervisor, Trap, TrapAction,
};

pub mod capture;
pub mod executor;

pub use capture::CappedBuffer;
pub use executor::{
    CommandRunner, ExecError, ExecLimits, ExecutionResult, ProcessExecutor, run_bounded,
};

pub mod execution;
pub mod project;
pub mod task;

pub use execution::{ExecutionStatus, TaskExecution};
pub use project::{GlobalVariable, Project, PythonEnvironment};
pub use task::{Task, TaskStatus};

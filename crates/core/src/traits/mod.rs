pub mod repositories;
pub mod services;

pub use repositories::{
    EnvironmentRepository, ExecutionRepository, ExecutionStatsUpdate, ProjectRepository,
    SecretCipher, SystemRepository, TaskRepository,
};
pub use services::{SchedulerHandle, TaskExecutionService};

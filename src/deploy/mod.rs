//! Deployment planning and execution (spec.md §4.5 "Deployment planner" and
//! §4.6 "Deployment executor").

pub mod exec;
pub mod plan;

pub use exec::{DeploymentExecutor, DeploymentHandle};
pub use plan::{plan_deployment, DeploymentPlan, DeploymentStep, StepAction};

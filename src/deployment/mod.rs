//! Deployment Module
//!
//! Ordered deployment steps sharing a context of typed attachments.
//! Lifecycle callbacks are registered up front as [`PostDeployHook`]s and
//! invoked with the deployment context passed in explicitly.

pub mod attachments;
pub mod operation;
pub mod steps;

pub use attachments::Attachments;
pub use operation::{DeploymentContext, DeploymentError, DeploymentOperation, DeploymentStep, HookError};
pub use steps::{
    DeployProcessStep, FnHook, HookRegistry, PendingDefinitions, PostDeployHook,
    PostDeployInvocationStep, ProcessRegistry,
};

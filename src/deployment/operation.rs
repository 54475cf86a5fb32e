//! Deployment operations: an ordered list of steps run against a shared
//! context.

use std::error::Error;

use log::{error, info};
use thiserror::Error;

use super::attachments::Attachments;

/// Error raised by a post-deploy hook.
pub type HookError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("step '{step}' requires attachment {attachment}")]
    MissingAttachment {
        step: String,
        attachment: &'static str,
    },

    #[error("step '{step}': definition '{key}' is invalid: {message}")]
    InvalidDefinition {
        step: String,
        key: String,
        message: String,
    },

    #[error("step '{step}': hook '{hook}' failed: {source}")]
    HookFailed {
        step: String,
        hook: String,
        #[source]
        source: HookError,
    },

    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },
}

/// State shared by the steps of one deployment.
#[derive(Debug)]
pub struct DeploymentContext {
    pub name: String,
    pub attachments: Attachments,
    /// Names of the steps that completed, in order
    completed_steps: Vec<String>,
}

impl DeploymentContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attachments: Attachments::new(),
            completed_steps: Vec::new(),
        }
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }
}

/// One step of a deployment.
pub trait DeploymentStep: Send {
    fn name(&self) -> &str;

    fn perform(&self, context: &mut DeploymentContext) -> Result<(), DeploymentError>;
}

/// Runs its steps in order and stops at the first failure.
pub struct DeploymentOperation {
    context: DeploymentContext,
    steps: Vec<Box<dyn DeploymentStep>>,
}

impl DeploymentOperation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            context: DeploymentContext::new(name),
            steps: Vec::new(),
        }
    }

    pub fn attach<T: std::any::Any + Send + Sync>(mut self, value: T) -> Self {
        self.context.attachments.insert(value);
        self
    }

    pub fn with_step(mut self, step: impl DeploymentStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn add_step(&mut self, step: Box<dyn DeploymentStep>) {
        self.steps.push(step);
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step and returns the final context.
    pub fn execute(mut self) -> Result<DeploymentContext, DeploymentError> {
        info!(
            "Deployment '{}': {} step(s)",
            self.context.name,
            self.steps.len()
        );

        for step in &self.steps {
            info!("  {}", step.name());
            if let Err(e) = step.perform(&mut self.context) {
                error!("Deployment '{}' aborted: {}", self.context.name, e);
                return Err(e);
            }
            self.context.completed_steps.push(step.name().to_string());
        }

        Ok(self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Trace(Vec<String>);

    struct Record(&'static str);

    impl DeploymentStep for Record {
        fn name(&self) -> &str {
            self.0
        }

        fn perform(&self, context: &mut DeploymentContext) -> Result<(), DeploymentError> {
            let trace = context
                .attachments
                .get_mut::<Trace>()
                .ok_or(DeploymentError::MissingAttachment {
                    step: self.0.to_string(),
                    attachment: Attachments::name_of::<Trace>(),
                })?;
            trace.0.push(self.0.to_string());
            Ok(())
        }
    }

    struct Fail;

    impl DeploymentStep for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn perform(&self, _context: &mut DeploymentContext) -> Result<(), DeploymentError> {
            Err(DeploymentError::StepFailed {
                step: "fail".to_string(),
                message: "boom".to_string(),
            })
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let context = DeploymentOperation::new("test")
            .attach(Trace::default())
            .with_step(Record("first"))
            .with_step(Record("second"))
            .execute()
            .unwrap();

        assert_eq!(
            context.attachments.get::<Trace>().unwrap().0,
            vec!["first".to_string(), "second".to_string()]
        );
        assert_eq!(context.completed_steps(), &["first", "second"]);
    }

    #[test]
    fn test_first_failure_aborts() {
        let mut operation = DeploymentOperation::new("test").attach(Trace::default());
        operation.add_step(Box::new(Record("first")));
        operation.add_step(Box::new(Fail));
        operation.add_step(Box::new(Record("never")));
        assert_eq!(operation.step_names(), vec!["first", "fail", "never"]);

        let err = operation.execute().unwrap_err();
        assert!(matches!(err, DeploymentError::StepFailed { .. }));
    }

    #[test]
    fn test_missing_attachment() {
        let err = DeploymentOperation::new("test")
            .with_step(Record("first"))
            .execute()
            .unwrap_err();
        assert!(err.to_string().contains("requires attachment"));
    }
}

//! Built-in deployment steps.
//!
//! - [`DeployProcessStep`] validates pending definitions and registers them
//! - [`PostDeployInvocationStep`] runs the hooks registered for the
//!   deployment, handing each one the deployment context

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use super::attachments::Attachments;
use super::operation::{DeploymentContext, DeploymentError, DeploymentStep, HookError};
use crate::process::{validate_definition, ProcessDefinition};

/// Definitions waiting to be deployed.
#[derive(Debug, Default)]
pub struct PendingDefinitions(pub Vec<ProcessDefinition>);

/// Definitions deployed so far, by key.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    definitions: BTreeMap<String, Arc<ProcessDefinition>>,
}

impl ProcessRegistry {
    pub fn get(&self, key: &str) -> Option<Arc<ProcessDefinition>> {
        self.definitions.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.definitions.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Callback run once a deployment has registered its definitions.
pub trait PostDeployHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_deploy(&self, context: &DeploymentContext) -> Result<(), HookError>;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        100
    }
}

/// Hook backed by a closure.
pub struct FnHook<F> {
    name: String,
    callback: F,
}

impl<F> FnHook<F>
where
    F: Fn(&DeploymentContext) -> Result<(), HookError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, callback: F) -> Self {
        Self {
            name: name.into(),
            callback,
        }
    }
}

impl<F> PostDeployHook for FnHook<F>
where
    F: Fn(&DeploymentContext) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_deploy(&self, context: &DeploymentContext) -> Result<(), HookError> {
        (self.callback)(context)
    }
}

/// Hooks registered for a deployment. Attach it to the operation to have
/// [`PostDeployInvocationStep`] run them.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn PostDeployHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn PostDeployHook>) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    pub fn with_hook(mut self, hook: impl PostDeployHook + 'static) -> Self {
        self.register(Arc::new(hook));
        self
    }

    /// Hooks in invocation order.
    pub fn hooks(&self) -> &[Arc<dyn PostDeployHook>] {
        &self.hooks
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Validates [`PendingDefinitions`] and moves them into the
/// [`ProcessRegistry`].
pub struct DeployProcessStep;

impl DeploymentStep for DeployProcessStep {
    fn name(&self) -> &str {
        "Deploy process definitions"
    }

    fn perform(&self, context: &mut DeploymentContext) -> Result<(), DeploymentError> {
        let pending = context
            .attachments
            .remove::<PendingDefinitions>()
            .ok_or(DeploymentError::MissingAttachment {
                step: self.name().to_string(),
                attachment: Attachments::name_of::<PendingDefinitions>(),
            })?;

        let mut validated = Vec::with_capacity(pending.0.len());
        for mut definition in pending.0 {
            validate_definition(&mut definition).map_err(|message| {
                DeploymentError::InvalidDefinition {
                    step: self.name().to_string(),
                    key: definition.key.clone(),
                    message,
                }
            })?;
            validated.push(definition);
        }

        if !context.attachments.contains::<ProcessRegistry>() {
            context.attachments.insert(ProcessRegistry::default());
        }
        let registry = context
            .attachments
            .get_mut::<ProcessRegistry>()
            .ok_or(DeploymentError::MissingAttachment {
                step: self.name().to_string(),
                attachment: Attachments::name_of::<ProcessRegistry>(),
            })?;
        for definition in validated {
            info!(
                "Deployed '{}' ({} activities)",
                definition.key,
                definition.len()
            );
            registry
                .definitions
                .insert(definition.key.clone(), Arc::new(definition));
        }
        Ok(())
    }
}

/// Runs every registered [`PostDeployHook`]. Without a [`HookRegistry`]
/// attachment the step does nothing.
pub struct PostDeployInvocationStep;

impl DeploymentStep for PostDeployInvocationStep {
    fn name(&self) -> &str {
        "Invoking post-deploy hooks"
    }

    fn perform(&self, context: &mut DeploymentContext) -> Result<(), DeploymentError> {
        let Some(registry) = context.attachments.get::<HookRegistry>() else {
            debug!("No hook registry attached to '{}'", context.name);
            return Ok(());
        };

        for hook in registry.hooks() {
            debug!("Post-deploy hook '{}'", hook.name());
            hook.on_deploy(context)
                .map_err(|source| DeploymentError::HookFailed {
                    step: self.name().to_string(),
                    hook: hook.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

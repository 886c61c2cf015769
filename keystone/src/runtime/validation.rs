use std::sync::Arc;

use crate::config::{BootConfig, RuntimeMode};

/// Checks that the host configuration is consistent with its runtime mode.
pub trait RuntimeModeValidator: Send + Sync {
    /// `Err` carries a message explaining what to change.
    fn validate(&self, mode: RuntimeMode, config: &BootConfig) -> Result<(), String>;
}

/// Production must not run with debugging enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugValidator;

impl RuntimeModeValidator for DebugValidator {
    fn validate(&self, mode: RuntimeMode, config: &BootConfig) -> Result<(), String> {
        if mode == RuntimeMode::Production && config.debug {
            return Err("Debug mode must be disabled in production runtime mode.".to_owned());
        }

        Ok(())
    }
}

/// Production must enforce HTTPS.
#[derive(Debug, Clone, Copy, Default)]
pub struct UseHttpsValidator;

impl RuntimeModeValidator for UseHttpsValidator {
    fn validate(&self, mode: RuntimeMode, config: &BootConfig) -> Result<(), String> {
        if mode == RuntimeMode::Production && !config.use_https {
            return Err("Using HTTPS must be enforced in production runtime mode.".to_owned());
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct RuntimeModeValidationService {
    validators: Vec<Arc<dyn RuntimeModeValidator>>,
}

impl RuntimeModeValidationService {
    /// A service without any validator.
    pub fn empty() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn with_validator<V: RuntimeModeValidator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Runs every validator and joins their messages. Backoffice development
    /// mode is never validated.
    pub fn validate(&self, config: &BootConfig) -> Result<(), String> {
        let mode = config.runtime_mode;

        if mode == RuntimeMode::BackofficeDevelopment {
            return Ok(());
        }

        let errors = self
            .validators
            .iter()
            .filter_map(|validator| validator.validate(mode, config).err())
            .collect::<Vec<_>>();

        if errors.is_empty() {
            return Ok(());
        }

        Err(format!(
            "Runtime mode validation failed for {mode:?}:\n{}",
            errors.join("\n")
        ))
    }
}

impl Default for RuntimeModeValidationService {
    fn default() -> Self {
        Self::empty()
            .with_validator(DebugValidator)
            .with_validator(UseHttpsValidator)
    }
}

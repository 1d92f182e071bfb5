//! Structural kinds: modules, outputs and variables have no side effects.

use super::{Provider, ProviderContext};
use crate::error::ProviderError;
use jumppad_schema::Resource;

/// Provider for kinds that only exist in the configuration.
#[derive(Debug, Clone, Copy)]
pub struct NullProvider {
    kind: &'static str,
}

impl NullProvider {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

impl Provider for NullProvider {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn create(&self, _resource: &mut Resource, _ctx: &ProviderContext<'_>) -> Result<(), ProviderError> {
        Ok(())
    }

    fn destroy(&self, _resource: &mut Resource, _ctx: &ProviderContext<'_>, _force: bool) -> Result<(), ProviderError> {
        Ok(())
    }

    fn lookup(&self, _resource: &Resource, _ctx: &ProviderContext<'_>) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

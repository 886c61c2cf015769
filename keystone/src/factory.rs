use std::sync::Arc;

use keystone_store::{Engine, ScopeProvider, StoreError};
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ConnectionStrings;

#[derive(Default)]
struct FactoryState {
    connection_strings: ConnectionStrings,
    scopes: Option<ScopeProvider>,
    upgrading: bool,
}

/// Owns the configured connection and hands out scope providers over it.
///
/// Clones share the same configuration, reconfiguring one clone is visible
/// through all of them.
#[derive(Clone, Default)]
pub struct DatabaseFactory {
    state: Arc<RwLock<FactoryState>>,
}

impl DatabaseFactory {
    /// A factory with no connection configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory over an already built engine.
    pub fn with_engine(connection_strings: ConnectionStrings, engine: Box<dyn Engine>) -> Self {
        let factory = Self::new();
        {
            let mut state = factory.state.write();
            state.connection_strings = connection_strings;
            state.scopes = Some(ScopeProvider::from_engine(engine));
        }

        factory
    }

    /// Builds a lazily connected engine for `connection_strings`. An
    /// unconfigured value resets the factory.
    pub fn configure(&self, connection_strings: ConnectionStrings) -> Result<(), StoreError> {
        let scopes = match (
            connection_strings.is_configured(),
            connection_strings.provider_name.as_deref(),
            connection_strings.connection_string.as_deref(),
        ) {
            (true, Some(provider_name), Some(connection_string)) => {
                debug!(provider_name, "configuring database factory");

                Some(ScopeProvider::from_engine(keystone_store::connect(
                    provider_name,
                    connection_string,
                )?))
            }
            _ => None,
        };

        let mut state = self.state.write();
        state.connection_strings = connection_strings;
        state.scopes = scopes;
        state.upgrading = false;

        Ok(())
    }

    pub fn configured(&self) -> bool {
        self.state.read().scopes.is_some()
    }

    pub fn connection_strings(&self) -> ConnectionStrings {
        self.state.read().connection_strings.clone()
    }

    pub fn provider_name(&self) -> Option<String> {
        self.state.read().connection_strings.provider_name.clone()
    }

    pub fn scope_provider(&self) -> Option<ScopeProvider> {
        self.state.read().scopes.clone()
    }

    /// A single connection attempt, `false` when not configured.
    pub async fn can_connect(&self) -> bool {
        match self.scope_provider() {
            Some(scopes) => scopes.engine().can_connect().await,
            None => false,
        }
    }

    pub async fn create_database(&self) -> Result<(), StoreError> {
        match self.scope_provider() {
            Some(scopes) => scopes.engine().create_database().await,
            None => Ok(()),
        }
    }

    /// Marks the factory as serving an upgrade.
    pub fn configure_for_upgrade(&self) {
        self.state.write().upgrading = true;
    }

    pub(crate) fn upgrade_finished(&self) {
        self.state.write().upgrading = false;
    }

    /// Signal for hosts: true while the last determined runtime level was
    /// `Upgrade`. Hosts read it to route requests to an upgrade screen or to
    /// hold back features that need the newest schema. Keystone itself only
    /// sets and clears it.
    pub fn is_upgrading(&self) -> bool {
        self.state.read().upgrading
    }
}

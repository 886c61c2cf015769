use std::{sync::Arc, time::Duration};

use keystone_store::ScopeProvider;
use parking_lot::Mutex;
use sea_query::{Expr, Func, Query};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{
    config::DEFAULT_CONFIG_RELOAD_TIMEOUT,
    error::InstallError,
    factory::DatabaseFactory,
    install::{
        validate_schema, BuildResult, DatabaseSchemaCreator, DatabaseSchemaResult,
        InstallOperationStatus, User, BASELINE_MARKER_TABLE, DEFAULT_SUPER_USER_PASSWORD,
        SUPER_USER_ID,
    },
    migrations::{MigrationPlan, MigrationPlanExecutor, Upgrader},
    notification::{EventAggregator, Notification},
    provider::{DatabaseModel, DatabaseProviderMetadata, ProviderRegistry},
    runtime::{RuntimeLevel, RuntimeState},
    settings::ConfigManipulator,
};

/// Validates and persists connection settings, installs the baseline schema
/// on empty databases and upgrades outdated ones.
#[derive(Clone)]
pub struct DatabaseBuilder {
    factory: DatabaseFactory,
    providers: ProviderRegistry,
    config_manipulator: Option<Arc<dyn ConfigManipulator>>,
    events: EventAggregator,
    runtime_state: watch::Receiver<RuntimeState>,
    core_plan: MigrationPlan,
    reload_timeout: Duration,
    schema_result: Arc<Mutex<Option<DatabaseSchemaResult>>>,
}

impl DatabaseBuilder {
    pub fn new(
        factory: DatabaseFactory,
        core_plan: MigrationPlan,
        runtime_state: watch::Receiver<RuntimeState>,
    ) -> Self {
        Self {
            factory,
            providers: ProviderRegistry::default(),
            config_manipulator: None,
            events: EventAggregator::default(),
            runtime_state,
            core_plan,
            reload_timeout: DEFAULT_CONFIG_RELOAD_TIMEOUT,
            schema_result: Arc::default(),
        }
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn config_manipulator(mut self, manipulator: Arc<dyn ConfigManipulator>) -> Self {
        self.config_manipulator = Some(manipulator);
        self
    }

    pub fn events(mut self, events: EventAggregator) -> Self {
        self.events = events;
        self
    }

    pub fn reload_timeout(mut self, timeout: Duration) -> Self {
        self.reload_timeout = timeout;
        self
    }

    pub fn core_plan(&self) -> &MigrationPlan {
        &self.core_plan
    }

    /// Whether a connection is configured. Says nothing about reachability.
    pub fn is_configured(&self) -> bool {
        self.factory.configured()
    }

    pub async fn can_connect(&self) -> bool {
        self.factory.can_connect().await
    }

    /// Probes an arbitrary connection without touching the configuration.
    pub async fn test_connection(&self, connection_string: &str, provider_name: &str) -> bool {
        match keystone_store::connect(provider_name, connection_string) {
            Ok(engine) => engine.can_connect().await,
            Err(err) => {
                debug!(provider_name, error = %err, "connection test failed");

                false
            }
        }
    }

    /// Whether the baseline schema is present.
    pub async fn is_installed(&self) -> Result<bool, InstallError> {
        let scopes = self.scopes()?;
        let scope = scopes.create_scope().await?;
        let installed = scope.table_exists(BASELINE_MARKER_TABLE).await?;
        scope.complete().await?;

        Ok(installed)
    }

    /// Whether anything but the seeded superuser with its default password
    /// exists.
    pub async fn has_some_non_default_user(&self) -> Result<bool, InstallError> {
        let scopes = self.scopes()?;
        let scope = scopes.create_scope().await?;

        let default_user = Query::select()
            .expr(Func::count(Expr::col(User::Id)))
            .from(User::Table)
            .and_where(Expr::col(User::Id).eq(SUPER_USER_ID))
            .and_where(Expr::col(User::Password).eq(DEFAULT_SUPER_USER_PASSWORD))
            .to_owned();

        let mut has = scope.count(&scope.backend().query(&default_user)).await? != 1;

        if !has {
            let all_users = Query::select()
                .expr(Func::count(Expr::col(User::Id)))
                .from(User::Table)
                .to_owned();

            has = scope.count(&scope.backend().query(&all_users)).await? != 1;
        }

        scope.complete().await?;

        Ok(has)
    }

    /// Checks connection details without persisting anything.
    pub async fn validate_database_connection(&self, model: &DatabaseModel) -> InstallOperationStatus {
        let Some(provider) = self.providers.get(&model.provider_metadata_id) else {
            return InstallOperationStatus::UnknownDatabaseProvider;
        };

        let Some(connection_string) = provider.generate_connection_string(model) else {
            return InstallOperationStatus::MissingConnectionString;
        };

        let provider_name = provider_name(provider.as_ref(), model);
        if provider_name.trim().is_empty() {
            return InstallOperationStatus::MissingProviderName;
        }

        if provider.requires_connection_test()
            && !self.test_connection(&connection_string, &provider_name).await
        {
            return InstallOperationStatus::DatabaseConnectionFailed;
        }

        InstallOperationStatus::Success
    }

    /// Generates, validates and persists a connection string, then waits for
    /// the configuration reload and reconfigures the factory with it.
    ///
    /// `None` performs a quick install with the first provider supporting it.
    /// Returns `false` when the details are invalid or unreachable.
    pub async fn configure_connection(
        &self,
        model: Option<DatabaseModel>,
    ) -> Result<bool, InstallError> {
        let (provider, model) = match model {
            Some(model) => (self.providers.get(&model.provider_metadata_id), model),
            None => {
                let provider = self.providers.available(true).into_iter().next();
                let model = DatabaseModel {
                    provider_metadata_id: provider
                        .as_ref()
                        .map(|p| p.id().to_owned())
                        .unwrap_or_default(),
                    database_name: provider
                        .as_ref()
                        .map(|p| p.default_database_name().to_owned())
                        .unwrap_or_default(),
                    ..Default::default()
                };

                (provider, model)
            }
        };

        let Some(provider) = provider else {
            return Err(InstallError::UnknownProvider(model.provider_metadata_id));
        };

        let provider_name = provider_name(provider.as_ref(), &model);
        let Some(connection_string) = provider
            .generate_connection_string(&model)
            .filter(|value| !value.trim().is_empty())
        else {
            return Ok(false);
        };

        if provider_name.trim().is_empty()
            || (provider.requires_connection_test()
                && !self.test_connection(&connection_string, &provider_name).await)
        {
            return Ok(false);
        }

        let manipulator = self
            .config_manipulator
            .as_ref()
            .ok_or(InstallError::NoConfigStorage)?;

        let mut reload = manipulator.subscribe();
        reload.borrow_and_update();

        manipulator
            .save_connection_string(&connection_string, &provider_name)
            .await?;

        match tokio::time::timeout(self.reload_timeout, reload.changed()).await {
            Ok(Ok(())) => {}
            _ => return Err(InstallError::ConfigurationReloadTimeout),
        }

        let connection_strings = reload.borrow_and_update().clone();
        self.factory.configure(connection_strings)?;
        self.schema_result.lock().take();

        if provider.force_create_database() {
            self.create_database().await?;
        }

        Ok(true)
    }

    /// Creates the physical database behind the configured connection.
    pub async fn create_database(&self) -> Result<(), InstallError> {
        info!("creating database");

        Ok(self.factory.create_database().await?)
    }

    /// Compares the live database with the baseline schema. The result is
    /// cached until the schema changes through this builder.
    pub async fn validate_schema(&self) -> Result<DatabaseSchemaResult, InstallError> {
        let Some(scopes) = self.factory.scope_provider() else {
            return Ok(DatabaseSchemaResult::default());
        };

        if let Some(result) = self.schema_result.lock().as_ref() {
            return Ok(result.clone());
        }

        let scope = scopes.create_scope().await?;
        let result = validate_schema(&scope).await?;
        scope.complete().await?;

        *self.schema_result.lock() = Some(result.clone());

        Ok(result)
    }

    /// Creates the baseline schema and seed data on an empty database. A
    /// database that already holds an installed version is reported as
    /// requiring an upgrade instead. Never fails, errors are folded into the
    /// result.
    pub async fn create_schema_and_data(&self) -> BuildResult {
        let result = match self.try_create_schema_and_data().await {
            Ok(result) => result,
            Err(err) => self.handle_install_error(&err),
        };

        if result.success {
            self.events.publish(Notification::DatabaseSchemaAndDataCreated {
                requires_upgrade: result.requires_upgrade,
            });
        }

        result
    }

    async fn try_create_schema_and_data(&self) -> Result<BuildResult, InstallError> {
        if !self.can_connect().await {
            return Ok(BuildResult::not_connectable());
        }

        info!("database configuration status: started");

        let scopes = self.scopes()?;
        let schema = self.validate_schema().await?;

        if schema.determine_has_installed_version() {
            info!("database requires upgrade");

            return Ok(BuildResult::requires_upgrade());
        }

        if self.runtime_state.borrow().level() == RuntimeLevel::Run {
            return Err(InstallError::AlreadyConfigured);
        }

        let scope = scopes.create_scope().await?;
        DatabaseSchemaCreator::new(&scope)
            .initialize(&self.core_plan)
            .await?;
        scope.complete().await?;

        self.schema_result.lock().take();

        let result = BuildResult::completed("Installation completed!");
        info!("database configuration status: {}", result.message);

        Ok(result)
    }

    /// Runs `plan` from its persisted state to its final state. Never fails,
    /// errors are folded into the result.
    pub async fn upgrade_schema_and_data(&self, plan: &MigrationPlan) -> BuildResult {
        if !self.can_connect().await {
            return BuildResult::not_connectable();
        }

        let scopes = match self.scopes() {
            Ok(scopes) => scopes,
            Err(err) => return self.handle_install_error(&err),
        };

        info!(plan = plan.name(), "database upgrade started");

        let executed = Upgrader::new(plan.clone())
            .execute(&MigrationPlanExecutor::new(scopes))
            .await;

        self.events
            .publish(Notification::MigrationPlanExecuted(executed.clone()));

        if let Some(err) = executed.error.filter(|_| !executed.successful) {
            return self.handle_install_error(&InstallError::Migration(err));
        }

        self.schema_result.lock().take();

        let result = BuildResult::completed("Upgrade completed!");
        info!("database configuration status: {}", result.message);

        result
    }

    fn scopes(&self) -> Result<ScopeProvider, InstallError> {
        self.factory
            .scope_provider()
            .ok_or(InstallError::NotConfigured)
    }

    fn handle_install_error(&self, err: &InstallError) -> BuildResult {
        error!(error = %err, "database configuration failed");

        if let Some(schema) = self.schema_result.lock().as_ref() {
            info!(
                summary = %schema.summary(),
                "the database schema validation produced the following summary"
            );
        }

        BuildResult::failed(err)
    }
}

fn provider_name(provider: &dyn DatabaseProviderMetadata, model: &DatabaseModel) -> String {
    model
        .provider_name
        .clone()
        .unwrap_or_else(|| provider.provider_name().to_owned())
}

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    config::{BootConfig, DEFAULT_DATA_DIRECTORY},
    error::BootFailedError,
    factory::DatabaseFactory,
    migrations::{state_value_key, MigrationPlan, PackageMigrationPlans},
    provider::ProviderRegistry,
    runtime::{
        ConflictingRouteService, ConnectionProber, RouteRegistry, RuntimeLevel,
        RuntimeLevelReason, RuntimeModeValidationService, SchemaInspector,
    },
};

/// Outcome of a level determination.
///
/// Soft conditions (nothing configured, empty or missing database) are plain
/// level and reason pairs. Conditions the process cannot recover from carry a
/// [`BootFailedError`].
#[derive(Debug, Clone)]
pub struct LevelDecision {
    pub level: RuntimeLevel,
    pub reason: RuntimeLevelReason,
    pub boot_failed: Option<BootFailedError>,
    pub current_migration_state: Option<String>,
    pub final_migration_state: Option<String>,
    pub pending_package_migrations: Vec<String>,
}

impl LevelDecision {
    pub fn new(level: RuntimeLevel, reason: RuntimeLevelReason) -> Self {
        Self {
            level,
            reason,
            boot_failed: None,
            current_migration_state: None,
            final_migration_state: None,
            pending_package_migrations: Vec::new(),
        }
    }

    pub fn failed(error: BootFailedError) -> Self {
        Self {
            boot_failed: Some(error.clone()),
            ..Self::new(RuntimeLevel::BootFailed, error.reason)
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.boot_failed.is_some()
    }
}

enum DatabaseState {
    CannotConnect,
    NotInstalled,
    NeedsUpgrade,
    NeedsPackageMigration,
    Ok,
}

/// Decides the runtime level from configuration and the live database.
#[derive(Clone)]
pub struct RuntimeLevelResolver {
    factory: DatabaseFactory,
    config: BootConfig,
    core_plan: MigrationPlan,
    packages: PackageMigrationPlans,
    providers: ProviderRegistry,
    validation: RuntimeModeValidationService,
    routes: Arc<dyn ConflictingRouteService>,
    prober: ConnectionProber,
    inspector: SchemaInspector,
}

impl RuntimeLevelResolver {
    pub fn new(factory: DatabaseFactory, config: BootConfig, core_plan: MigrationPlan) -> Self {
        Self {
            factory,
            prober: ConnectionProber::from_config(&config),
            config,
            core_plan,
            packages: PackageMigrationPlans::default(),
            providers: ProviderRegistry::with_defaults(DEFAULT_DATA_DIRECTORY),
            validation: RuntimeModeValidationService::default(),
            routes: Arc::new(RouteRegistry::default()),
            inspector: SchemaInspector,
        }
    }

    pub fn packages(mut self, packages: PackageMigrationPlans) -> Self {
        self.packages = packages;
        self
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn validation(mut self, validation: RuntimeModeValidationService) -> Self {
        self.validation = validation;
        self
    }

    pub fn routes<R: ConflictingRouteService + 'static>(mut self, routes: R) -> Self {
        self.routes = Arc::new(routes);
        self
    }

    pub fn routes_arc(mut self, routes: Arc<dyn ConflictingRouteService>) -> Self {
        self.routes = routes;
        self
    }

    pub fn core_plan(&self) -> &MigrationPlan {
        &self.core_plan
    }

    /// Determines the level. Checks short-circuit in order: configuration,
    /// runtime mode, routes, connectivity, baseline schema, plan states.
    pub async fn determine_level(&self) -> LevelDecision {
        if !self.factory.configured() {
            debug!("database is not configured, need to install");

            return LevelDecision::new(RuntimeLevel::Install, RuntimeLevelReason::InstallNoDatabase);
        }

        if let Err(message) = self.validation.validate(&self.config) {
            error!("{message}");

            return LevelDecision::failed(BootFailedError::new(
                RuntimeLevelReason::BootFailedOnException,
                message,
            ));
        }

        if let Some(name) = self.routes.conflicting_route() {
            let message = format!(
                "Conflicting routes, you cannot have multiple controllers with the same name: {name}"
            );
            error!("{message}");

            return LevelDecision::failed(BootFailedError::new(
                RuntimeLevelReason::BootFailedOnException,
                message,
            ));
        }

        let mut decision = LevelDecision::new(RuntimeLevel::Run, RuntimeLevelReason::Run);

        match self.database_state(&mut decision).await {
            Err(err) => LevelDecision::failed(err),
            Ok(DatabaseState::CannotConnect) => {
                debug!("could not connect to database");

                if self.providers.can_force_create_database(&self.factory) {
                    return LevelDecision::new(
                        RuntimeLevel::BootFailed,
                        RuntimeLevelReason::InstallMissingDatabase,
                    );
                }

                LevelDecision::failed(BootFailedError::new(
                    RuntimeLevelReason::BootFailedCannotConnectToDatabase,
                    "A connection string is configured but the database could not be reached.",
                ))
            }
            Ok(DatabaseState::NotInstalled) => {
                LevelDecision::new(RuntimeLevel::Install, RuntimeLevelReason::InstallEmptyDatabase)
            }
            Ok(DatabaseState::NeedsUpgrade) => {
                debug!("has not reached the final upgrade step, need to upgrade");

                decision.level = if self.config.upgrade_unattended {
                    RuntimeLevel::Run
                } else {
                    RuntimeLevel::Upgrade
                };
                decision.reason = RuntimeLevelReason::UpgradeMigrations;
                decision
            }
            Ok(DatabaseState::NeedsPackageMigration) => {
                if self.config.package_migrations_unattended {
                    debug!("package migrations need to execute");
                    decision.reason = RuntimeLevelReason::UpgradePackageMigrations;
                } else {
                    info!("package migrations need to execute but unattended package migrations is disabled, they will need to be run manually");
                }

                decision
            }
            Ok(DatabaseState::Ok) => decision,
        }
    }

    async fn database_state(
        &self,
        decision: &mut LevelDecision,
    ) -> Result<DatabaseState, BootFailedError> {
        if !self.prober.can_connect(&self.factory).await {
            return Ok(DatabaseState::CannotConnect);
        }

        let Some(scopes) = self.factory.scope_provider() else {
            return Ok(DatabaseState::CannotConnect);
        };

        let inspection = self.inspector.inspect(&scopes).await.map_err(|err| {
            warn!(error = %err, "could not check the upgrade state");

            BootFailedError::new(
                RuntimeLevelReason::BootFailedCannotCheckUpgradeState,
                "Could not check the upgrade state.",
            )
            .with_source(err)
        })?;

        if !inspection.installed {
            return Ok(DatabaseState::NotInstalled);
        }

        decision.pending_package_migrations = self.packages.pending(&inspection.migration_states);

        let current = inspection
            .migration_states
            .get(&state_value_key(self.core_plan.name()))
            .cloned()
            .flatten();

        let requires_upgrade = current.as_deref() != Some(self.core_plan.final_state());

        decision.current_migration_state = current;
        decision.final_migration_state = Some(self.core_plan.final_state().to_owned());

        if requires_upgrade {
            return Ok(DatabaseState::NeedsUpgrade);
        }

        if !decision.pending_package_migrations.is_empty() {
            return Ok(DatabaseState::NeedsPackageMigration);
        }

        Ok(DatabaseState::Ok)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use keystone_store::{Backend, Engine, StoreError, Transaction};
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        config::{ConfigBuilder, ConnectionStrings, RuntimeMode},
        migrations::{Migration, MigrationContext},
    };

    #[derive(Clone, Default)]
    struct FakeEngine {
        connectable: bool,
        probes: Arc<AtomicUsize>,
        begins: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Engine for FakeEngine {
        fn provider_name(&self) -> &str {
            "fake"
        }

        fn backend(&self) -> Backend {
            Backend::Sqlite
        }

        async fn can_connect(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.connectable
        }

        async fn create_database(&self) -> keystone_store::Result<()> {
            Ok(())
        }

        async fn begin(&self) -> keystone_store::Result<Box<dyn Transaction>> {
            self.begins.fetch_add(1, Ordering::SeqCst);

            Err(StoreError::Any(anyhow::anyhow!("schema query failed")))
        }
    }

    #[derive(Default)]
    struct Noop;

    #[async_trait]
    impl Migration for Noop {
        async fn migrate(&self, _context: &mut MigrationContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn plan() -> MigrationPlan {
        MigrationPlan::builder("Keystone.Core")
            .from("")
            .to::<Noop>("done")
            .build()
            .unwrap()
    }

    fn fast_config() -> BootConfig {
        ConfigBuilder::new()
            .connect_attempts(3)
            .connect_retry_interval(Duration::from_millis(1))
            .build()
    }

    fn resolver(engine: &FakeEngine, provider_name: &str, config: BootConfig) -> RuntimeLevelResolver {
        let factory = DatabaseFactory::with_engine(
            ConnectionStrings::new("fake://", provider_name),
            Box::new(engine.clone()),
        );

        RuntimeLevelResolver::new(factory, config, plan())
    }

    #[tokio::test]
    async fn not_configured() {
        let decision = RuntimeLevelResolver::new(DatabaseFactory::new(), fast_config(), plan())
            .determine_level()
            .await;

        assert_eq!(decision.level, RuntimeLevel::Install);
        assert_eq!(decision.reason, RuntimeLevelReason::InstallNoDatabase);
        assert!(!decision.is_fatal());
    }

    #[tokio::test]
    #[traced_test]
    async fn unreachable_force_create_provider() {
        let engine = FakeEngine::default();
        let decision = resolver(&engine, "sqlite", fast_config())
            .determine_level()
            .await;

        assert_eq!(decision.level, RuntimeLevel::BootFailed);
        assert_eq!(decision.reason, RuntimeLevelReason::InstallMissingDatabase);
        assert!(!decision.is_fatal());
        assert_eq!(engine.probes.load(Ordering::SeqCst), 3);
        assert_eq!(engine.begins.load(Ordering::SeqCst), 0);
        assert!(logs_contain("could not connect to database, retrying"));
    }

    #[tokio::test]
    async fn unreachable_server_provider() {
        let engine = FakeEngine::default();
        let decision = resolver(&engine, "postgres", fast_config())
            .determine_level()
            .await;

        assert_eq!(decision.level, RuntimeLevel::BootFailed);
        assert_eq!(
            decision.reason,
            RuntimeLevelReason::BootFailedCannotConnectToDatabase
        );
        assert!(decision.is_fatal());
        assert_eq!(engine.begins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inspection_failure() {
        let engine = FakeEngine {
            connectable: true,
            ..Default::default()
        };
        let decision = resolver(&engine, "sqlite", fast_config())
            .determine_level()
            .await;

        assert_eq!(
            decision.reason,
            RuntimeLevelReason::BootFailedCannotCheckUpgradeState
        );
        let error = decision.boot_failed.unwrap();
        assert_eq!(error.message, "Could not check the upgrade state.");
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(engine.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_runtime_mode() {
        let engine = FakeEngine::default();
        let config = ConfigBuilder::new()
            .runtime_mode(RuntimeMode::Production)
            .debug(true)
            .use_https(true)
            .build();

        let decision = resolver(&engine, "sqlite", config).determine_level().await;

        assert_eq!(decision.level, RuntimeLevel::BootFailed);
        assert_eq!(decision.reason, RuntimeLevelReason::BootFailedOnException);
        assert!(decision
            .boot_failed
            .unwrap()
            .message
            .contains("Debug mode must be disabled"));
        assert_eq!(engine.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn conflicting_routes() {
        let engine = FakeEngine::default();
        let decision = resolver(&engine, "sqlite", fast_config())
            .routes(RouteRegistry::new().register("Content").register("Content"))
            .determine_level()
            .await;

        assert_eq!(decision.reason, RuntimeLevelReason::BootFailedOnException);
        assert_eq!(
            decision.boot_failed.unwrap().message,
            "Conflicting routes, you cannot have multiple controllers with the same name: Content"
        );
        assert_eq!(engine.probes.load(Ordering::SeqCst), 0);
    }
}

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::{
    config::{BootConfig, DEFAULT_DATA_DIRECTORY},
    error::BootFailedError,
    factory::DatabaseFactory,
    install::DatabaseBuilder,
    migrations::{MigrationPlan, MigrationPlanExecutor, PackageMigrationPlans},
    notification::{EventAggregator, Notification},
    provider::ProviderRegistry,
    runtime::{
        ConflictingRouteService, RuntimeLevel, RuntimeLevelReason, RuntimeLevelResolver,
        RuntimeModeValidationService, RuntimeState,
    },
    settings::ConfigManipulator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpgradeResult {
    NotRequired,
    HasErrors,
    CoreUpgradeComplete,
    PackageMigrationComplete,
}

/// Drives the boot sequence: determine the level, install or upgrade
/// unattended when configured to, and publish the resulting state.
pub struct CoreRuntime {
    factory: DatabaseFactory,
    config: BootConfig,
    core_plan: MigrationPlan,
    packages: PackageMigrationPlans,
    resolver: RuntimeLevelResolver,
    builder: DatabaseBuilder,
    events: EventAggregator,
    state: watch::Sender<RuntimeState>,
}

impl CoreRuntime {
    pub fn builder(factory: DatabaseFactory, core_plan: MigrationPlan) -> CoreRuntimeBuilder {
        CoreRuntimeBuilder::new(factory, core_plan)
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> RuntimeState {
        self.state.borrow().clone()
    }

    /// Receives every state the runtime publishes.
    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    pub fn database_builder(&self) -> &DatabaseBuilder {
        &self.builder
    }

    pub fn events(&self) -> &EventAggregator {
        &self.events
    }

    pub fn factory(&self) -> &DatabaseFactory {
        &self.factory
    }

    pub async fn start(&self) -> RuntimeState {
        self.boot(false).await
    }

    /// Runs the boot sequence again, typically after the operator finished
    /// an install or an upgrade. A stored fatal error is kept.
    pub async fn restart(&self) -> RuntimeState {
        self.boot(true).await
    }

    async fn boot(&self, is_restarting: bool) -> RuntimeState {
        self.determine_runtime_level().await;

        if self.run_unattended_install().await {
            self.determine_runtime_level().await;
        }

        if !self.state.borrow().can_boot() {
            return self.state();
        }

        match self.run_unattended_upgrade().await {
            UpgradeResult::HasErrors => return self.state(),
            UpgradeResult::CoreUpgradeComplete | UpgradeResult::PackageMigrationComplete => {
                self.determine_runtime_level().await;
            }
            UpgradeResult::NotRequired => {}
        }

        let level = self.state.borrow().level();
        self.events.publish(Notification::ApplicationStarting {
            level,
            is_restarting,
        });

        self.state()
    }

    async fn determine_runtime_level(&self) {
        if self.state.borrow().boot_failed().is_some() {
            return;
        }

        let decision = self.resolver.determine_level().await;

        if let Some(err) = &decision.boot_failed {
            error!(reason = %err.reason, error = %err, "boot failed");
        }

        self.state.send_modify(|state| state.apply(decision));

        let (level, reason) = {
            let state = self.state.borrow();
            (state.level(), state.reason())
        };

        debug!(%level, %reason, "runtime level determined");

        if level == RuntimeLevel::Upgrade {
            debug!("configure database factory for upgrades");
            self.factory.configure_for_upgrade();
        } else {
            self.factory.upgrade_finished();
        }

        self.events
            .publish(Notification::RuntimeLevelDetermined { level, reason });
    }

    /// Installs the baseline schema when the database is empty or missing
    /// and unattended install is enabled. Returns whether it ran.
    async fn run_unattended_install(&self) -> bool {
        let reason = self.state.borrow().reason();

        if !self.config.install_unattended || !reason.is_install() {
            return false;
        }

        info!(%reason, "starting unattended install");

        if reason == RuntimeLevelReason::InstallMissingDatabase {
            if let Err(err) = self.builder.create_database().await {
                self.fail(BootFailedError::new(
                    RuntimeLevelReason::BootFailedOnException,
                    format!("Unattended installation failed: {err}"),
                )
                .with_source(err));

                return true;
            }
        }

        let result = self.builder.create_schema_and_data().await;

        if !result.success {
            self.fail(BootFailedError::new(
                RuntimeLevelReason::BootFailedOnException,
                format!("Unattended installation failed: {}", result.message),
            ));
        }

        true
    }

    async fn run_unattended_upgrade(&self) -> UpgradeResult {
        let (level, reason, pending) = {
            let state = self.state.borrow();
            (
                state.level(),
                state.reason(),
                state.pending_package_migrations().to_vec(),
            )
        };

        if level != RuntimeLevel::Run {
            return UpgradeResult::NotRequired;
        }

        match reason {
            RuntimeLevelReason::UpgradeMigrations => {
                info!(plan = self.core_plan.name(), "starting unattended upgrade");

                let result = self.builder.upgrade_schema_and_data(&self.core_plan).await;

                if !result.success {
                    self.fail(BootFailedError::new(
                        RuntimeLevelReason::BootFailedOnException,
                        format!("An error occurred while running the unattended upgrade.\n{}", result.message),
                    ));

                    return UpgradeResult::HasErrors;
                }

                self.state.send_modify(|state| {
                    state.configure(RuntimeLevel::Run, RuntimeLevelReason::UpgradeMigrations)
                });

                UpgradeResult::CoreUpgradeComplete
            }
            RuntimeLevelReason::UpgradePackageMigrations if !pending.is_empty() => {
                let Some(scopes) = self.factory.scope_provider() else {
                    return UpgradeResult::NotRequired;
                };

                let executor = MigrationPlanExecutor::new(scopes);
                let executed = self.packages.execute_pending(&executor, &pending).await;

                let mut failure = None;
                for plan in executed {
                    if !plan.successful && failure.is_none() {
                        failure = Some(format!(
                            "Package migration plan `{}` failed: {}",
                            plan.plan.name(),
                            plan.error
                                .as_ref()
                                .map(|err| err.to_string())
                                .unwrap_or_default()
                        ));
                    }

                    self.events.publish(Notification::MigrationPlanExecuted(plan));
                }

                if let Some(message) = failure {
                    self.fail(BootFailedError::new(
                        RuntimeLevelReason::BootFailedOnException,
                        message,
                    ));

                    return UpgradeResult::HasErrors;
                }

                UpgradeResult::PackageMigrationComplete
            }
            _ => UpgradeResult::NotRequired,
        }
    }

    fn fail(&self, err: BootFailedError) {
        error!(error = %err, "boot failed");

        self.state.send_modify(|state| state.fail(err));
    }
}

/// Builder for [`CoreRuntime`].
pub struct CoreRuntimeBuilder {
    factory: DatabaseFactory,
    core_plan: MigrationPlan,
    config: BootConfig,
    packages: PackageMigrationPlans,
    providers: ProviderRegistry,
    validation: RuntimeModeValidationService,
    routes: Option<Arc<dyn ConflictingRouteService>>,
    config_manipulator: Option<Arc<dyn ConfigManipulator>>,
    events: EventAggregator,
}

impl CoreRuntimeBuilder {
    pub fn new(factory: DatabaseFactory, core_plan: MigrationPlan) -> Self {
        Self {
            factory,
            core_plan,
            config: BootConfig::default(),
            packages: PackageMigrationPlans::default(),
            providers: ProviderRegistry::with_defaults(DEFAULT_DATA_DIRECTORY),
            validation: RuntimeModeValidationService::default(),
            routes: None,
            config_manipulator: None,
            events: EventAggregator::default(),
        }
    }

    pub fn config(mut self, config: BootConfig) -> Self {
        self.config = config;
        self
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
        self.routes = Some(Arc::new(routes));
        self
    }

    pub fn config_manipulator<M: ConfigManipulator + 'static>(mut self, manipulator: M) -> Self {
        self.config_manipulator = Some(Arc::new(manipulator));
        self
    }

    pub fn events(mut self, events: EventAggregator) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> CoreRuntime {
        let (state, receiver) = watch::channel(RuntimeState::booting());

        let mut resolver = RuntimeLevelResolver::new(
            self.factory.clone(),
            self.config.clone(),
            self.core_plan.clone(),
        )
        .packages(self.packages.clone())
        .providers(self.providers.clone())
        .validation(self.validation);

        if let Some(routes) = self.routes {
            resolver = resolver.routes_arc(routes);
        }

        let mut builder = DatabaseBuilder::new(self.factory.clone(), self.core_plan.clone(), receiver)
            .providers(self.providers)
            .events(self.events.clone())
            .reload_timeout(self.config.config_reload_timeout);

        if let Some(manipulator) = self.config_manipulator {
            builder = builder.config_manipulator(manipulator);
        }

        CoreRuntime {
            factory: self.factory,
            config: self.config,
            core_plan: self.core_plan,
            packages: self.packages,
            resolver,
            builder,
            events: self.events,
            state,
        }
    }
}

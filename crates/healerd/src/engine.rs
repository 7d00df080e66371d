//! Healer engine
//!
//! Single entry point for an orchestration layer: diagnosis, heal requests,
//! operator decisions, pattern management and history. Wires the database,
//! pattern store and healing executor together from a [`HealerConfig`].

use healer_common::{
    DiagnosticExecution, HealerResult, HealingExecution, HealingPattern, Target,
};
use std::sync::Arc;
use tracing::info;

use crate::config::HealerConfig;
use crate::db::HealerDb;
use crate::healing::HealingExecutor;
use crate::patterns::PatternStore;
use crate::remote::RemoteExecutor;

/// Default page size for history listings
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

pub struct Healer {
    db: HealerDb,
    patterns: Arc<PatternStore>,
    executor: HealingExecutor,
}

impl Healer {
    /// Open the configured database and start the engine
    pub async fn open(config: &HealerConfig, remote: Arc<dyn RemoteExecutor>) -> HealerResult<Self> {
        let db = HealerDb::open(&config.storage.database_path).await?;
        Self::with_db(db, config, remote).await
    }

    /// Start the engine on an already open database: load patterns,
    /// register configured targets and recover in-flight executions
    pub async fn with_db(
        db: HealerDb,
        config: &HealerConfig,
        remote: Arc<dyn RemoteExecutor>,
    ) -> HealerResult<Self> {
        let patterns = Arc::new(PatternStore::load(db.clone(), config.learning.policy()).await?);
        let executor = HealingExecutor::new(db.clone(), remote, Arc::clone(&patterns), config)?;

        for target in &config.targets {
            executor.register_target(&target.to_target()).await?;
        }
        let resumed = executor.resume().await?;
        info!(
            "Healer ready: {} configured targets, {} patterns, {} unfinished executions",
            config.targets.len(),
            patterns.list().await.len(),
            resumed
        );

        Ok(Self {
            db,
            patterns,
            executor,
        })
    }

    /// Swap in a customised executor (rule table, check catalog)
    pub fn map_executor<F>(mut self, f: F) -> Self
    where
        F: FnOnce(HealingExecutor) -> HealingExecutor,
    {
        self.executor = f(self.executor);
        self
    }

    pub fn executor(&self) -> &HealingExecutor {
        &self.executor
    }

    // ========================================================================
    // Diagnosis and healing
    // ========================================================================

    pub async fn run_diagnosis(
        &self,
        target_id: &str,
        triggered_by: &str,
    ) -> HealerResult<DiagnosticExecution> {
        self.executor.run_diagnosis(target_id, triggered_by).await
    }

    pub async fn request_heal(
        &self,
        target_id: &str,
        requested_by: &str,
    ) -> HealerResult<HealingExecution> {
        self.executor.request_heal(target_id, requested_by).await
    }

    pub async fn approve(
        &self,
        execution_id: &str,
        approved_by: &str,
    ) -> HealerResult<HealingExecution> {
        self.executor.approve(execution_id, approved_by).await
    }

    pub async fn reject(
        &self,
        execution_id: &str,
        rejected_by: &str,
    ) -> HealerResult<HealingExecution> {
        self.executor.reject(execution_id, rejected_by).await
    }

    pub async fn rollback(&self, execution_id: &str) -> HealerResult<HealingExecution> {
        self.executor.rollback(execution_id).await
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    pub async fn list_patterns(&self) -> Vec<HealingPattern> {
        self.patterns.list().await
    }

    pub async fn set_pattern_approval(
        &self,
        pattern_id: &str,
        approved: bool,
    ) -> HealerResult<HealingPattern> {
        self.patterns.set_approval(pattern_id, approved).await
    }

    // ========================================================================
    // Targets and history
    // ========================================================================

    pub async fn register_target(&self, target: &Target) -> HealerResult<Target> {
        self.executor.register_target(target).await
    }

    pub async fn targets(&self) -> HealerResult<Vec<Target>> {
        self.db.list_targets().await
    }

    pub async fn get_target(&self, target_id: &str) -> HealerResult<Target> {
        self.executor.load_target(target_id).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> HealerResult<Option<HealingExecution>> {
        self.db.get_execution(execution_id).await
    }

    /// Newest first
    pub async fn list_executions(
        &self,
        target_id: &str,
        limit: usize,
    ) -> HealerResult<Vec<HealingExecution>> {
        self.db.list_executions(target_id, limit).await
    }

    /// Newest first
    pub async fn list_diagnostics(
        &self,
        target_id: &str,
        limit: usize,
    ) -> HealerResult<Vec<DiagnosticExecution>> {
        self.db.list_diagnostics(target_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::remote::FakeRemoteExecutor;
    use healer_common::HealingMode;

    fn config() -> HealerConfig {
        let mut config = HealerConfig::default();
        config.targets.push(TargetConfig {
            id: "blog".into(),
            url: "https://blog.test".into(),
            root_path: "/srv/blog".into(),
            healing_mode: HealingMode::SemiAuto,
            healer_enabled: true,
            max_healing_attempts: 3,
            healing_cooldown_secs: 3600,
        });
        config
    }

    #[tokio::test]
    async fn test_configured_targets_registered() {
        let db = HealerDb::open_in_memory().await.unwrap();
        let healer = Healer::with_db(db, &config(), Arc::new(FakeRemoteExecutor::new()))
            .await
            .unwrap();
        let targets = healer.targets().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].healing_mode, HealingMode::SemiAuto);
    }

    #[tokio::test]
    async fn test_reregistration_keeps_counters() {
        let db = HealerDb::open_in_memory().await.unwrap();
        let healer = Healer::with_db(db.clone(), &config(), Arc::new(FakeRemoteExecutor::new()))
            .await
            .unwrap();

        let mut target = healer.get_target("blog").await.unwrap();
        target.current_healing_attempts = 2;
        target.health_score = 40;
        db.upsert_target(&target).await.unwrap();

        let mut changed = config();
        changed.targets[0].healing_mode = HealingMode::FullAuto;
        let healer = Healer::with_db(db, &changed, Arc::new(FakeRemoteExecutor::new()))
            .await
            .unwrap();

        let target = healer.get_target("blog").await.unwrap();
        assert_eq!(target.healing_mode, HealingMode::FullAuto);
        assert_eq!(target.current_healing_attempts, 2);
        assert_eq!(target.health_score, 40);
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let db = HealerDb::open_in_memory().await.unwrap();
        let healer = Healer::with_db(db, &HealerConfig::default(), Arc::new(FakeRemoteExecutor::new()))
            .await
            .unwrap();
        let err = healer.request_heal("nope", "test").await.unwrap_err();
        assert_eq!(err.code(), "target_not_found");
    }
}

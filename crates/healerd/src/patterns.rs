//! Pattern Store
//!
//! In-memory index of learned healing patterns with write-through to SQLite.
//! Lookups are read-only snapshots. Each signature has its own mutex, so an
//! outcome update (counts, confidence, approval flag, persistence) happens as
//! one read-modify-write and concurrent heals of different targets sharing a
//! signature never lose an update.

use healer_common::{
    ApprovalPolicy, HealerError, HealerResult, HealingPattern, PatternSignature,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::db::HealerDb;

pub struct PatternStore {
    patterns: RwLock<HashMap<String, Arc<Mutex<HealingPattern>>>>,
    db: Option<HealerDb>,
    policy: ApprovalPolicy,
}

impl PatternStore {
    /// Store without persistence
    pub fn in_memory(policy: ApprovalPolicy) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            db: None,
            policy,
        }
    }

    /// Load every persisted pattern and write through from now on
    pub async fn load(db: HealerDb, policy: ApprovalPolicy) -> HealerResult<Self> {
        let stored = db.list_patterns().await?;
        info!("Loaded {} healing patterns", stored.len());
        let patterns = stored
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(Mutex::new(p))))
            .collect();
        Ok(Self {
            patterns: RwLock::new(patterns),
            db: Some(db),
            policy,
        })
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Snapshot of the pattern for a signature. Never mutates.
    pub async fn lookup(&self, signature: &PatternSignature) -> Option<HealingPattern> {
        let entry = self.patterns.read().await.get(&signature.key()).cloned()?;
        let pattern = entry.lock().await.clone();
        Some(pattern)
    }

    /// Apply one healing outcome to a signature, creating it on first sight.
    /// Returns the updated pattern.
    pub async fn record_outcome(
        &self,
        signature: &PatternSignature,
        commands: &[String],
        success: bool,
    ) -> HealerResult<HealingPattern> {
        let entry = self.entry(signature, commands).await;
        let mut pattern = entry.lock().await;

        let was_approved = pattern.auto_approved;
        pattern.record(commands, success, &self.policy);
        if let Some(db) = &self.db {
            db.upsert_pattern(&pattern).await?;
        }

        if pattern.auto_approved != was_approved {
            info!(
                signature = %pattern.id,
                "Pattern auto-approval {} (successes {}, confidence {:.2})",
                if pattern.auto_approved { "granted" } else { "revoked" },
                pattern.success_count,
                pattern.confidence
            );
        } else {
            debug!(
                signature = %pattern.id,
                "Recorded {} (confidence {:.2})",
                if success { "success" } else { "failure" },
                pattern.confidence
            );
        }
        Ok(pattern.clone())
    }

    async fn entry(
        &self,
        signature: &PatternSignature,
        commands: &[String],
    ) -> Arc<Mutex<HealingPattern>> {
        let key = signature.key();
        if let Some(entry) = self.patterns.read().await.get(&key) {
            return Arc::clone(entry);
        }
        let mut patterns = self.patterns.write().await;
        Arc::clone(patterns.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(HealingPattern::new(
                signature.clone(),
                commands.to_vec(),
            )))
        }))
    }

    /// All patterns, ordered by id
    pub async fn list(&self) -> Vec<HealingPattern> {
        let entries: Vec<_> = self.patterns.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.lock().await.clone());
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Operator override of the approval flag. The flag is pinned afterwards.
    pub async fn set_approval(&self, pattern_id: &str, approved: bool) -> HealerResult<HealingPattern> {
        let entry = self
            .patterns
            .read()
            .await
            .get(pattern_id)
            .cloned()
            .ok_or_else(|| HealerError::PatternNotFound(pattern_id.to_string()))?;

        let mut pattern = entry.lock().await;
        pattern.pin_approval(approved);
        if let Some(db) = &self.db {
            db.upsert_pattern(&pattern).await?;
        }
        info!(signature = %pattern.id, "Operator set auto-approval to {}", approved);
        Ok(pattern.clone())
    }
}

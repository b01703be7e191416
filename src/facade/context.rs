use std::sync::Arc;

use chrono::{Local, NaiveDateTime, SubsecRound, Utc};

use crate::config::EngineConfig;
use crate::core::Result;
use crate::plan::{Cipher, PassthroughCipher};
use crate::proposal::ProposedSet;
use crate::schema::SchemaStore;
use crate::storage::RelationalStore;

use super::ReconciliationRun;

/// Times a run stamps into records and audit entries, fixed at run start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunClock {
    /// Local time written into changed-at fields.
    pub stamp: NaiveDateTime,
    /// UTC time of the audit entries.
    pub audit: NaiveDateTime,
}

impl RunClock {
    pub fn now() -> Self {
        Self {
            stamp: Local::now().naive_local().trunc_subsecs(0),
            audit: Utc::now().naive_utc().trunc_subsecs(0),
        }
    }

    pub fn fixed(at: NaiveDateTime) -> Self {
        Self { stamp: at, audit: at }
    }
}

/// Everything a run needs besides its proposed rows.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use recordplan::{EngineConfig, EngineContext, MemoryStore, RecordTypeSchema, SchemaStore};
///
/// # fn main() -> recordplan::Result<()> {
/// let schema = SchemaStore::from_kinds([RecordTypeSchema::new("Order").keys(["order_id"])])?;
/// let context = EngineContext::new(schema, Arc::new(MemoryStore::new()))
///     .with_config(EngineConfig::new().system_user("IMPORT"));
/// assert_eq!(context.config().system_user, "IMPORT");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EngineContext {
    schema: SchemaStore,
    config: EngineConfig,
    store: Arc<dyn RelationalStore>,
    cipher: Arc<dyn Cipher>,
}

impl EngineContext {
    pub fn new(schema: SchemaStore, store: Arc<dyn RelationalStore>) -> Self {
        Self {
            schema,
            config: EngineConfig::default(),
            store,
            cipher: Arc::new(PassthroughCipher),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RelationalStore> {
        &self.store
    }

    pub fn cipher(&self) -> &Arc<dyn Cipher> {
        &self.cipher
    }

    /// Load, match and reconcile `proposed`, leaving the run ready to
    /// render.
    pub async fn stage(&self, proposed: &ProposedSet) -> Result<ReconciliationRun> {
        self.stage_at(proposed, RunClock::now()).await
    }

    pub async fn stage_at(&self, proposed: &ProposedSet, clock: RunClock) -> Result<ReconciliationRun> {
        let mut run = ReconciliationRun::new(self.clone(), proposed, clock)?;
        run.load().await?;
        run.apply()?;
        run.reconcile();
        Ok(run)
    }
}

use tracing::{Instrument, Span, debug, info, info_span, warn};
use uuid::Uuid;

use crate::core::{ReconcileError, Result};
use crate::executor::Executor;
use crate::loader::{TreeLoader, VersionIndex};
use crate::matcher::UpdateMatcher;
use crate::plan::{Plan, PlanBuilder, Script};
use crate::proposal::{ProgenitorRef, ProposedSet};
use crate::reconciler::{OrderReconciler, ReconcileSummary};
use crate::result::ExecutionLog;
use crate::tree::{ChangeStamp, NodeId, RecordTree};

use super::{EngineContext, RunClock};

/// One reconciliation of a proposed row set against the store.
///
/// The run owns its tree. Stages are `load`, `apply`, `reconcile`, then
/// `render` (or `finalize`/`execute`); [`EngineContext::stage`] performs
/// the first three.
pub struct ReconciliationRun {
    id: Uuid,
    span: Span,
    context: EngineContext,
    clock: RunClock,
    stamp: ChangeStamp,
    proposed: ProposedSet,
    progenitors: Vec<ProgenitorRef>,
    tree: RecordTree,
    versions: VersionIndex,
    diagnostics: Vec<ReconcileError>,
    summary: ReconcileSummary,
}

impl ReconciliationRun {
    /// Validate the proposed rows and collate the progenitors to load.
    pub fn new(context: EngineContext, proposed: &ProposedSet, clock: RunClock) -> Result<Self> {
        let id = Uuid::new_v4();
        let span = info_span!("reconcile", run_id = %id);
        let _guard = span.enter();

        let (proposed, diagnostics) = proposed.validate(context.schema(), context.config())?;
        let progenitors = proposed.progenitors(context.schema(), context.config())?;
        info!(
            kinds = proposed.iter().count(),
            rows = proposed.row_count(),
            progenitors = progenitors.len(),
            "run staged"
        );

        let stamp = ChangeStamp::new(context.config(), clock.stamp);
        drop(_guard);
        Ok(Self {
            id,
            span,
            context,
            clock,
            stamp,
            proposed,
            progenitors,
            tree: RecordTree::new(),
            versions: VersionIndex::default(),
            diagnostics,
            summary: ReconcileSummary::default(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn clock(&self) -> RunClock {
        self.clock
    }

    pub fn progenitors(&self) -> &[ProgenitorRef] {
        &self.progenitors
    }

    pub fn tree(&self) -> &RecordTree {
        &self.tree
    }

    pub fn outline(&self) -> String {
        self.tree.outline()
    }

    /// Include or exclude a node from the plan before rendering. Returns
    /// false for an id that does not belong to this run's tree.
    pub fn set_apply(&mut self, node: NodeId, apply: bool) -> bool {
        self.tree.set_apply(node, apply)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.tree.has_pending_changes()
    }

    /// Soft failures collected so far.
    pub fn diagnostics(&self) -> &[ReconcileError] {
        &self.diagnostics
    }

    pub fn summary(&self) -> ReconcileSummary {
        self.summary
    }

    pub async fn load(&mut self) -> Result<()> {
        let mut loader = TreeLoader::new(
            self.context.schema().clone(),
            self.context.config().clone(),
            self.context.store().clone(),
        );
        loader
            .load_progenitors(&mut self.tree, &self.progenitors)
            .instrument(self.span.clone())
            .await?;
        if !loader.is_settled() {
            return Err(ReconcileError::Store(format!(
                "{} store requests still outstanding",
                loader.pending()
            )));
        }

        let (versions, diagnostics) = loader.into_parts();
        let _guard = self.span.enter();
        debug!(nodes = self.tree.len(), versions = versions.len(), "tree loaded");
        self.versions = versions;
        self.diagnostics.extend(diagnostics);
        Ok(())
    }

    /// Merge every proposed row into the tree.
    pub fn apply(&mut self) -> Result<()> {
        let _guard = self.span.enter();
        let mut matcher = UpdateMatcher::new(
            self.context.schema(),
            self.context.config(),
            &self.versions,
            &self.stamp,
        );
        for (kind, rows) in self.proposed.iter() {
            for row in rows {
                match matcher.apply(&mut self.tree, kind, row) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(kind = %kind, error = %e, "row skipped");
                        self.diagnostics.push(e);
                    }
                }
            }
        }
        self.diagnostics.extend(matcher.into_diagnostics());
        Ok(())
    }

    pub fn reconcile(&mut self) -> ReconcileSummary {
        let _guard = self.span.enter();
        self.summary = OrderReconciler::new(self.context.config(), &self.stamp).reconcile(&mut self.tree);
        self.summary
    }

    pub fn render(&self) -> Result<Plan> {
        let _guard = self.span.enter();
        PlanBuilder::new(self.context.schema(), self.context.config(), self.clock.audit).render(&self.tree)
    }

    /// Render and encrypt the audit entries. Entries that fail to encrypt
    /// are recorded as diagnostics.
    pub async fn finalize(&mut self) -> Result<Script> {
        let plan = self.render()?;
        let script = plan
            .finalize(self.context.cipher().as_ref(), self.context.config())
            .instrument(self.span.clone())
            .await;
        self.diagnostics.extend(script.dropped.iter().cloned());
        Ok(script)
    }

    pub async fn execute(&mut self) -> Result<ExecutionLog> {
        let script = self.finalize().await?;
        let log = Executor::new(self.context.store().clone())
            .run(&script.statements)
            .instrument(self.span.clone())
            .await;

        let _guard = self.span.enter();
        info!(
            statements = log.len(),
            succeeded = log.succeeded(),
            failed = log.failed(),
            "run executed"
        );
        Ok(log)
    }
}

//! Pipeline orchestration: scan → plan → apply as plain function
//! composition over typed values. Streaming is a side channel via
//! [`JobHandle`], never the control flow.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use namegnome_config::Config;
use namegnome_model::{
    ApplyOptions, ApplyReport, PlanReview, ScanRequest, ScanSnapshot,
};

use crate::anthology::llm::{GroupingModel, OllamaModel};
use crate::apply::ApplyExecutor;
use crate::cache::CacheStore;
use crate::disambig::DisambiguationLedger;
use crate::error::{CoreError, Result};
use crate::jobs::JobHandle;
use crate::mapper::{Mapper, PlanOptions};
use crate::plan::{DraftItem, assemble};
use crate::providers::ProviderGateway;
use crate::scanner;

/// Snapshots and plans stay loadable for a week.
const ARTIFACT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

fn scan_key(scan_id: Uuid) -> String {
    format!("scan:{scan_id}")
}

fn plan_key(plan_id: Uuid) -> String {
    format!("plan:{plan_id}")
}

fn options_key(scan_id: Uuid) -> String {
    format!("plan_options:{scan_id}")
}

/// One handle owning the pipeline's collaborators. The cache handle and the
/// provider gateway are the only process-wide singletons; everything else is
/// built per call.
pub struct Pipeline {
    store: Arc<CacheStore>,
    gateway: Arc<ProviderGateway>,
    ledger: DisambiguationLedger,
    executor: ApplyExecutor,
    config: Arc<Config>,
    model: Option<Arc<dyn GroupingModel>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(store: Arc<CacheStore>, gateway: Arc<ProviderGateway>, config: Arc<Config>) -> Self {
        let model: Option<Arc<dyn GroupingModel>> = if config.llm.enabled {
            Some(Arc::new(OllamaModel::new(&config.llm)))
        } else {
            None
        };
        Self {
            ledger: DisambiguationLedger::new(Arc::clone(&store)),
            executor: ApplyExecutor::new(Arc::clone(&store)),
            store,
            gateway,
            config,
            model,
        }
    }

    /// Swap the grouping model; used by tests and alternative backends.
    pub fn with_model(mut self, model: Arc<dyn GroupingModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn ledger(&self) -> &DisambiguationLedger {
        &self.ledger
    }

    pub fn executor(&self) -> &ApplyExecutor {
        &self.executor
    }

    // ----- scan -----

    pub async fn scan(&self, request: &ScanRequest, job: Option<&JobHandle>) -> Result<ScanSnapshot> {
        if let Some(job) = job {
            job.progress("scan", 0, 1);
        }
        let snapshot = scanner::scan_root(&request.root, request.media_type)?;
        self.store
            .kv_put_json(&scan_key(snapshot.scan_id), &snapshot, Some(ARTIFACT_TTL))
            .await?;
        if let Some(job) = job {
            job.progress("scan", 1, 1);
        }
        info!(
            scan_id = %snapshot.scan_id,
            files = snapshot.files.len(),
            fingerprint = %snapshot.fingerprint,
            "scan complete"
        );
        Ok(snapshot)
    }

    pub async fn load_snapshot(&self, scan_id: Uuid) -> Result<Option<ScanSnapshot>> {
        Ok(self
            .store
            .kv_get_json::<ScanSnapshot>(&scan_key(scan_id))
            .await?
            .map(|cached| cached.value))
    }

    // ----- plan -----

    /// Deterministic passes first, LLM refinement on the residue, then a
    /// stable assembly. Per-item provider trouble degrades to
    /// `needs_review`; ambiguity aborts with a disambiguation signal.
    pub async fn plan(
        &self,
        snapshot: &ScanSnapshot,
        options: &PlanOptions,
        job: Option<&JobHandle>,
    ) -> Result<PlanReview> {
        if !options.offline {
            self.config
                .validate_online()
                .map_err(|err| CoreError::Fatal(err.to_string()))?;
        }
        self.store
            .kv_put_json(&options_key(snapshot.scan_id), options, Some(ARTIFACT_TTL))
            .await?;

        let mapper = Mapper::new(&self.gateway, &self.ledger, options);
        let model = self.model.as_deref().filter(|_| options.use_llm);
        let total = snapshot.files.len() as u64;

        let mut drafts: Vec<DraftItem> = Vec::new();
        for (index, file) in snapshot.files.iter().enumerate() {
            if let Some(job) = job {
                job.progress("plan", index as u64, total);
            }
            let mapped = mapper.map_file(snapshot.scan_id, file, model).await?;
            for draft in &mapped {
                for warning in &draft.warnings {
                    if let Some(job) = job {
                        job.warning(warning.as_str(), crate::logging::redacted(&file.path));
                    }
                }
            }
            drafts.extend(mapped);
        }
        if let Some(job) = job {
            job.progress("plan", total, total);
        }

        let mut notes = Vec::new();
        if options.offline {
            notes.push("planned offline: cache misses are flagged needs_review".to_string());
        }
        let review = assemble(snapshot, drafts, notes)?;
        self.store
            .kv_put_json(&plan_key(review.plan_id), &review, Some(ARTIFACT_TTL))
            .await?;
        info!(
            plan_id = %review.plan_id,
            items = review.items.len(),
            "plan assembled"
        );
        Ok(review)
    }

    pub async fn load_plan(&self, plan_id: Uuid) -> Result<Option<PlanReview>> {
        Ok(self
            .store
            .kv_get_json::<PlanReview>(&plan_key(plan_id))
            .await?
            .map(|cached| cached.value))
    }

    /// Resolve a pending disambiguation and re-plan from the pinned entity.
    /// Deterministic results for everything else are reused via the cache.
    pub async fn resolve_and_replan(&self, token: &str, choice_id: &str) -> Result<PlanReview> {
        let pending = self.ledger.resolve(token, choice_id).await?;
        let Some(snapshot) = self.load_snapshot(pending.scan_id).await? else {
            return Err(CoreError::Validation(format!(
                "scan {} behind token {token} has expired; re-scan first",
                pending.scan_id
            )));
        };
        let options = self
            .store
            .kv_get_json::<PlanOptions>(&options_key(pending.scan_id))
            .await?
            .map(|cached| cached.value)
            .unwrap_or_default();
        self.plan(&snapshot, &options, None).await
    }

    // ----- apply -----

    pub async fn apply(
        &self,
        plan: &PlanReview,
        options: &ApplyOptions,
        job: Option<&JobHandle>,
    ) -> Result<ApplyReport> {
        let snapshot = self.load_snapshot(plan.scan_id).await?;
        let Some(snapshot) = snapshot else {
            return Err(CoreError::StalePlan {
                expected: plan.source_fingerprint.clone(),
                actual: "scan snapshot expired".to_string(),
            });
        };
        self.executor
            .apply(
                plan,
                &snapshot.root,
                Some(&snapshot),
                options,
                self.config.timeouts.lock_acquire(),
                job,
            )
            .await
    }

    pub async fn apply_by_id(
        &self,
        plan_id: Uuid,
        options: &ApplyOptions,
        job: Option<&JobHandle>,
    ) -> Result<ApplyReport> {
        let Some(plan) = self.load_plan(plan_id).await? else {
            return Err(CoreError::Validation(format!("unknown plan id: {plan_id}")));
        };
        self.apply(&plan, options, job).await
    }
}

//! Disambiguation ledger: tokens for pending entity choices, persisted user
//! decisions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use uuid::Uuid;

use namegnome_model::{Decision, DisambiguationCandidate, PendingDisambiguation, ProviderKind};

use crate::cache::CacheStore;
use crate::error::{CoreError, Result};

/// Pending tokens linger for a week; resolved decisions live in the
/// decisions table and never expire implicitly.
const PENDING_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

const TOKEN_LEN: usize = 16;

fn kv_key(token: &str) -> String {
    format!("disambig:{token}")
}

pub fn mint_token() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TOKEN_LEN)
        .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_lowercase())
        .collect();
    format!("dsk_{suffix}")
}

#[derive(Debug, Clone)]
pub struct DisambiguationLedger {
    store: Arc<CacheStore>,
}

impl DisambiguationLedger {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    /// Mint a token for an ambiguous resolution and persist the pending
    /// state. `suggested` defaults to the first candidate.
    pub async fn mint(
        &self,
        scan_id: Uuid,
        field: &str,
        scope: &str,
        title_norm: &str,
        year: i32,
        candidates: Vec<DisambiguationCandidate>,
    ) -> Result<PendingDisambiguation> {
        let pending = PendingDisambiguation {
            token: mint_token(),
            scan_id,
            field: field.to_string(),
            scope: scope.to_string(),
            title_norm: title_norm.to_string(),
            year,
            suggested: candidates.first().map(|c| c.id.clone()),
            candidates,
            created_at: Utc::now(),
            resolved_choice: None,
        };
        self.store
            .kv_put_json(&kv_key(&pending.token), &pending, Some(PENDING_TTL))
            .await?;
        Ok(pending)
    }

    pub async fn get(&self, token: &str) -> Result<Option<PendingDisambiguation>> {
        Ok(self
            .store
            .kv_get_json::<PendingDisambiguation>(&kv_key(token))
            .await?
            .filter(|cached| !cached.stale)
            .map(|cached| cached.value))
    }

    /// Resolve a token to one of its candidates: writes the decision row and
    /// marks the pending state resumable.
    pub async fn resolve(&self, token: &str, choice_id: &str) -> Result<PendingDisambiguation> {
        let Some(mut pending) = self.get(token).await? else {
            return Err(CoreError::Validation(format!(
                "unknown disambiguation token: {token}"
            )));
        };
        let Some(choice) = pending
            .candidates
            .iter()
            .find(|candidate| candidate.id == choice_id)
        else {
            return Err(CoreError::Validation(format!(
                "choice {choice_id} is not a candidate of {token}"
            )));
        };

        let decision = Decision {
            scope: pending.scope.clone(),
            title_norm: pending.title_norm.clone(),
            year: pending.year,
            provider: choice.provider,
            ext_id: choice.id.clone(),
            decided_at: Utc::now(),
        };
        self.store.put_decision(&decision).await?;

        pending.resolved_choice = Some(choice_id.to_string());
        self.store
            .kv_put_json(&kv_key(token), &pending, Some(PENDING_TTL))
            .await?;
        Ok(pending)
    }

    /// Programmatic pin: callers with an explicit `(provider, ext_id)` skip
    /// the token round-trip entirely.
    pub async fn pin(
        &self,
        scope: &str,
        title_norm: &str,
        year: i32,
        provider: ProviderKind,
        ext_id: &str,
    ) -> Result<()> {
        self.store
            .put_decision(&Decision {
                scope: scope.to_string(),
                title_norm: title_norm.to_string(),
                year,
                provider,
                ext_id: ext_id.to_string(),
                decided_at: Utc::now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<DisambiguationCandidate> {
        vec![
            DisambiguationCandidate {
                provider: ProviderKind::Tvdb,
                id: "1981".to_string(),
                title: "Danger Mouse".to_string(),
                year: Some(1981),
            },
            DisambiguationCandidate {
                provider: ProviderKind::Tvdb,
                id: "2015".to_string(),
                title: "Danger Mouse (2015)".to_string(),
                year: Some(2015),
            },
        ]
    }

    #[test]
    fn tokens_have_the_documented_shape() {
        let token = mint_token();
        assert!(token.starts_with("dsk_"));
        assert_eq!(token.len(), 4 + TOKEN_LEN);
        assert!(
            token[4..]
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        );
    }

    #[tokio::test]
    async fn resolve_writes_decision_and_marks_resumable() {
        let store = Arc::new(CacheStore::open_in_memory().await.unwrap());
        let ledger = DisambiguationLedger::new(Arc::clone(&store));
        let pending = ledger
            .mint(Uuid::nil(), "series", "tv", "danger mouse", -1, candidates())
            .await
            .unwrap();
        assert_eq!(pending.suggested.as_deref(), Some("1981"));

        let resolved = ledger.resolve(&pending.token, "2015").await.unwrap();
        assert_eq!(resolved.resolved_choice.as_deref(), Some("2015"));

        let decision = store
            .get_decision("tv", "danger mouse", -1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decision.ext_id, "2015");
    }

    #[tokio::test]
    async fn resolving_unknown_token_fails() {
        let store = Arc::new(CacheStore::open_in_memory().await.unwrap());
        let ledger = DisambiguationLedger::new(store);
        let err = ledger.resolve("dsk_missing", "x").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

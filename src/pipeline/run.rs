// src/pipeline/run.rs

//! One tracker run: fetch → consistency gate → assemble → compare → persist → announce.
//!
//! A snapshot is saved and promoted whenever the three queries agree on the
//! update token, whether or not it is announced, so `latest.csv` always
//! follows the registry. Announcing happens after promotion: a failed post is
//! reported but never re-sent for the same token.

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Category, Config, Snapshot, UpdateToken};
use crate::pipeline::assemble::assemble;
use crate::pipeline::diff::{DiffCalculator, PublishDecision};
use crate::services::publisher::compose_post;
use crate::services::{Post, PostContext, PostReceipt, Publisher, StationSource, TableRenderer};
use crate::storage::{RunReport, SnapshotId, SnapshotStore};

/// External pieces a run talks to.
pub struct Collaborators<'a> {
    pub source: &'a dyn StationSource,
    pub store: &'a dyn SnapshotStore,
    /// `None` skips rendering
    pub renderer: Option<&'a dyn TableRenderer>,
    /// `None` skips posting
    pub publisher: Option<&'a dyn Publisher>,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Snapshot saved, promoted and announced
    Published {
        token: UpdateToken,
        decision: PublishDecision,
        receipt: Option<PostReceipt>,
    },
    /// Snapshot saved and promoted; macro stations did not grow
    NoUpdate {
        token: UpdateToken,
        decision: PublishDecision,
    },
    /// This update was handled by an earlier run
    AlreadyPublished { token: UpdateToken },
}

impl RunOutcome {
    pub fn token(&self) -> &UpdateToken {
        match self {
            RunOutcome::Published { token, .. }
            | RunOutcome::NoUpdate { token, .. }
            | RunOutcome::AlreadyPublished { token } => token,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Published { .. } => "published",
            RunOutcome::NoUpdate { .. } => "no_update",
            RunOutcome::AlreadyPublished { .. } => "already_published",
        }
    }

    fn decision(&self) -> Option<&PublishDecision> {
        match self {
            RunOutcome::Published { decision, .. } | RunOutcome::NoUpdate { decision, .. } => {
                Some(decision)
            }
            RunOutcome::AlreadyPublished { .. } => None,
        }
    }
}

/// Require all category queries to report the same update.
pub fn check_consistency(
    listing: &UpdateToken,
    milli_wave: &UpdateToken,
    sub6: &UpdateToken,
) -> Result<()> {
    if listing == milli_wave && milli_wave == sub6 {
        return Ok(());
    }
    Err(AppError::InconsistentUpdate {
        listing: listing.to_string(),
        milli_wave: milli_wave.to_string(),
        sub6: sub6.to_string(),
    })
}

/// Query all categories and assemble the current snapshot.
pub async fn fetch_snapshot(source: &dyn StationSource) -> Result<Snapshot> {
    let listing = source.fetch_listing().await?;
    log::info!(
        "Listing: {} macro, {} femto municipalities (updated {})",
        listing.macro_cells.counts.len(),
        listing.femto_cells.counts.len(),
        listing.macro_cells.updated
    );

    let milli_wave = source.fetch_band(Category::MilliWave).await?;
    log::info!(
        "Millimeter-wave: {} stations (updated {})",
        milli_wave.total(),
        milli_wave.updated
    );

    let sub6 = source.fetch_band(Category::Sub6).await?;
    log::info!("Sub-6: {} stations (updated {})", sub6.total(), sub6.updated);

    check_consistency(&listing.macro_cells.updated, &milli_wave.updated, &sub6.updated)?;

    let updated = listing.macro_cells.updated.clone();
    Ok(assemble(
        updated,
        &[listing.macro_cells, listing.femto_cells, milli_wave, sub6],
    ))
}

/// Fetch and compare against the baseline without writing anything.
pub async fn preview(
    config: &Config,
    source: &dyn StationSource,
    store: &dyn SnapshotStore,
) -> Result<(Snapshot, PublishDecision)> {
    let current = fetch_snapshot(source).await?;
    let baseline = store.load(&SnapshotId::Latest).await?;
    let decision = DiffCalculator::from_config(&config.diff)?.decide(&current, baseline.as_ref());
    Ok((current, decision))
}

/// Run the full pipeline once and record a report of the result.
pub async fn run_pipeline(config: &Config, deps: &Collaborators<'_>) -> Result<RunOutcome> {
    let started_at = Utc::now();
    let (outcome, rows) = execute(config, deps).await?;

    let report = RunReport {
        started_at,
        finished_at: Utc::now(),
        token: Some(outcome.token().clone()),
        outcome: outcome.label().to_string(),
        rows,
        macro_total: outcome.decision().map(|d| d.macro_total),
    };
    if let Err(e) = deps.store.write_report(&report).await {
        log::warn!("Failed to write run report: {e}");
    }

    log::info!(
        "Run finished: update {}, {} rows, macro {}, {}",
        outcome.token(),
        report.rows,
        report
            .macro_total
            .map(|n| format!("{n:+}"))
            .unwrap_or_else(|| "-".to_string()),
        report.outcome
    );

    Ok(outcome)
}

async fn execute(config: &Config, deps: &Collaborators<'_>) -> Result<(RunOutcome, usize)> {
    let calculator = DiffCalculator::from_config(&config.diff)?;

    let current = fetch_snapshot(deps.source).await?;
    let token = current.updated.clone();
    let rows = current.len();

    if deps.store.exists(&token).await? {
        log::info!("Update {token} was already handled; nothing to do");
        return Ok((RunOutcome::AlreadyPublished { token }, rows));
    }

    let baseline = deps.store.load(&SnapshotId::Latest).await?;
    match &baseline {
        Some(b) => log::info!("Baseline {} with {} municipalities", b.updated, b.len()),
        None => log::info!("No baseline yet; comparing against zero"),
    }

    let decision = calculator.decide(&current, baseline.as_ref());
    log::info!(
        "Macro change {:+} across {} municipalities",
        decision.macro_total,
        decision.delta.rows.len()
    );

    match deps.store.save(&token, &current).await {
        Ok(meta) => log::debug!("Snapshot written to {}", meta.location),
        Err(AppError::AlreadyPublished(_)) => {
            return Ok((RunOutcome::AlreadyPublished { token }, rows));
        }
        Err(e) => return Err(e),
    }
    deps.store.promote(&token).await?;

    if !decision.worthy {
        log::info!("{}", decision.summary);
        return Ok((RunOutcome::NoUpdate { token, decision }, rows));
    }

    let receipt = announce(config, deps, &current, &decision).await?;
    Ok((
        RunOutcome::Published {
            token,
            decision,
            receipt,
        },
        rows,
    ))
}

async fn announce(
    config: &Config,
    deps: &Collaborators<'_>,
    current: &Snapshot,
    decision: &PublishDecision,
) -> Result<Option<PostReceipt>> {
    let mut media = Vec::new();
    if let Some(renderer) = deps.renderer {
        media.push(renderer.render(current, &decision.delta).await?);
    }

    let Some(publisher) = deps.publisher else {
        log::info!("Publishing disabled; summary:\n{}", decision.summary);
        return Ok(None);
    };

    let text = compose_post(
        &config.publish,
        &PostContext {
            updated: &current.updated,
            prefecture: &config.registry.prefecture,
            licensee: &config.registry.licensee,
            summary: &decision.summary,
        },
    );

    let receipt = publisher.publish(&Post { text, media }).await?;
    Ok(Some(receipt))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::models::CategorySeries;
    use crate::pipeline::diff::{Delta, NO_UPDATE};
    use crate::services::publisher::media_type;
    use crate::services::{ListingCounts, PngTableRenderer};
    use crate::storage::{LocalStorage, SaveMetadata};

    struct FakeSource {
        tokens: [&'static str; 3],
        macros: Vec<(&'static str, u64)>,
    }

    impl FakeSource {
        fn new(token: &'static str, macros: &[(&'static str, u64)]) -> Self {
            Self {
                tokens: [token; 3],
                macros: macros.to_vec(),
            }
        }
    }

    #[async_trait]
    impl StationSource for FakeSource {
        async fn fetch_listing(&self) -> Result<ListingCounts> {
            let token = UpdateToken::new(self.tokens[0]);
            let mut macro_cells = CategorySeries::new(Category::Macro, "愛媛県", token.clone());
            for (name, n) in &self.macros {
                macro_cells = macro_cells.with(*name, *n);
            }
            Ok(ListingCounts {
                macro_cells,
                femto_cells: CategorySeries::new(Category::Femto, "愛媛県", token).with("松山市", 1),
            })
        }

        async fn fetch_band(&self, category: Category) -> Result<CategorySeries> {
            let token = match category {
                Category::MilliWave => self.tokens[1],
                _ => self.tokens[2],
            };
            Ok(CategorySeries::new(category, "愛媛県", UpdateToken::new(token)).with("松山市", 2))
        }
    }

    /// Counts every call before delegating.
    struct CountingStore {
        inner: LocalStorage,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotStore for CountingStore {
        async fn exists(&self, token: &UpdateToken) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.exists(token).await
        }
        async fn load(&self, id: &SnapshotId) -> Result<Option<Snapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load(id).await
        }
        async fn save(&self, token: &UpdateToken, snapshot: &Snapshot) -> Result<SaveMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.save(token, snapshot).await
        }
        async fn promote(&self, token: &UpdateToken) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.promote(token).await
        }
        async fn write_report(&self, report: &RunReport) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.write_report(report).await
        }
        async fn load_report(&self) -> Result<Option<RunReport>> {
            self.inner.load_report().await
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        posts: Mutex<Vec<Post>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, post: &Post) -> Result<PostReceipt> {
            self.posts.lock().unwrap().push(post.clone());
            Ok(PostReceipt { id: "1".into() })
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _post: &Post) -> Result<PostReceipt> {
            Err(AppError::publish("rate limited"))
        }
    }

    struct FixedRenderer;

    #[async_trait]
    impl TableRenderer for FixedRenderer {
        async fn render(&self, snapshot: &Snapshot, _delta: &Delta) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("{}.png", snapshot.updated)))
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.publish.link = "https://example.com".into();
        config
    }

    #[tokio::test]
    async fn test_first_run_publishes_and_promotes() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::new(tmp.path());
        let source = FakeSource::new("2024-01-01", &[("松山市", 5), ("伊予郡松前町", 3)]);
        let publisher = RecordingPublisher::default();
        let deps = Collaborators {
            source: &source,
            store: &store,
            renderer: Some(&FixedRenderer),
            publisher: Some(&publisher),
        };

        let outcome = run_pipeline(&config(), &deps).await.unwrap();
        let RunOutcome::Published { decision, receipt, .. } = outcome else {
            panic!("expected a published outcome");
        };
        assert_eq!(decision.macro_total, 8);
        assert_eq!(decision.summary, "松前町 +3\n松山市 +5");
        assert_eq!(receipt, Some(PostReceipt { id: "1".into() }));

        let posts = publisher.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].text.starts_with("2024-01-01現在"));
        assert!(posts[0].text.contains("松山市 +5"));
        assert_eq!(posts[0].media, vec![PathBuf::from("2024-01-01.png")]);

        let latest = store.load(&SnapshotId::Latest).await.unwrap().unwrap();
        assert_eq!(latest.updated, UpdateToken::new("2024-01-01"));
        assert_eq!(latest.len(), 2);

        let report = store.load_report().await.unwrap().unwrap();
        assert_eq!(report.outcome, "published");
        assert_eq!(report.macro_total, Some(8));
    }

    #[tokio::test]
    async fn test_rendered_table_is_attached() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::new(tmp.path().join("csv"));
        let renderer = PngTableRenderer::new(tmp.path().join("images"));
        let source = FakeSource::new("2024-01-01", &[("松山市", 5)]);
        let publisher = RecordingPublisher::default();
        let deps = Collaborators {
            source: &source,
            store: &store,
            renderer: Some(&renderer),
            publisher: Some(&publisher),
        };

        run_pipeline(&config(), &deps).await.unwrap();

        let posts = publisher.posts.lock().unwrap();
        assert_eq!(posts[0].media.len(), 1);
        let image = &posts[0].media[0];
        assert!(image.exists());
        assert!(media_type(image).is_some());
    }

    #[tokio::test]
    async fn test_rerun_on_same_update_is_noop() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::new(tmp.path());
        let source = FakeSource::new("2024-01-01", &[("松山市", 5)]);
        let publisher = RecordingPublisher::default();
        let deps = Collaborators {
            source: &source,
            store: &store,
            renderer: None,
            publisher: Some(&publisher),
        };

        run_pipeline(&config(), &deps).await.unwrap();
        let outcome = run_pipeline(&config(), &deps).await.unwrap();

        assert!(matches!(outcome, RunOutcome::AlreadyPublished { .. }));
        assert_eq!(publisher.posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decline_is_saved_but_not_posted() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::new(tmp.path());
        let publisher = RecordingPublisher::default();

        let first = FakeSource::new("2024-01-01", &[("松山市", 5), ("今治市", 1)]);
        run_pipeline(
            &config(),
            &Collaborators {
                source: &first,
                store: &store,
                renderer: None,
                publisher: Some(&publisher),
            },
        )
        .await
        .unwrap();

        let second = FakeSource::new("2024-01-08", &[("松山市", 3), ("今治市", 2)]);
        let outcome = run_pipeline(
            &config(),
            &Collaborators {
                source: &second,
                store: &store,
                renderer: None,
                publisher: Some(&publisher),
            },
        )
        .await
        .unwrap();

        let RunOutcome::NoUpdate { decision, .. } = outcome else {
            panic!("expected no update");
        };
        assert_eq!(decision.macro_total, -1);
        assert_eq!(decision.summary, NO_UPDATE);
        assert_eq!(publisher.posts.lock().unwrap().len(), 1);

        assert!(tmp.path().join("2024-01-08.csv").exists());
        let latest = store.load(&SnapshotId::Latest).await.unwrap().unwrap();
        assert_eq!(latest.updated, UpdateToken::new("2024-01-08"));
    }

    #[tokio::test]
    async fn test_inconsistent_tokens_abort_before_store() {
        let tmp = TempDir::new().unwrap();
        let store = CountingStore {
            inner: LocalStorage::new(tmp.path()),
            calls: AtomicUsize::new(0),
        };
        let source = FakeSource {
            tokens: ["2024-01-01", "2024-01-01", "2024-01-02"],
            macros: vec![("松山市", 5)],
        };
        let deps = Collaborators {
            source: &source,
            store: &store,
            renderer: None,
            publisher: None,
        };

        let err = run_pipeline(&config(), &deps).await.unwrap_err();
        assert!(matches!(err, AppError::InconsistentUpdate { ref sub6, .. } if sub6 == "2024-01-02"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_promoted_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::new(tmp.path());
        let source = FakeSource::new("2024-01-01", &[("松山市", 5)]);
        let deps = Collaborators {
            source: &source,
            store: &store,
            renderer: None,
            publisher: Some(&FailingPublisher),
        };

        let err = run_pipeline(&config(), &deps).await.unwrap_err();
        assert!(matches!(err, AppError::Publish(_)));
        assert!(store.load(&SnapshotId::Latest).await.unwrap().is_some());

        let outcome = run_pipeline(&config(), &deps).await.unwrap();
        assert!(matches!(outcome, RunOutcome::AlreadyPublished { .. }));
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStorage::new(tmp.path());
        let source = FakeSource::new("2024-01-01", &[("松山市", 5)]);

        let (snapshot, decision) = preview(&config(), &source, &store).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(decision.worthy);
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_check_consistency() {
        let a = UpdateToken::new("2024-01-01");
        let b = UpdateToken::new("2024-01-02");
        assert!(check_consistency(&a, &a, &a).is_ok());
        assert!(check_consistency(&a, &b, &a).is_err());
        assert!(check_consistency(&b, &a, &a).is_err());
    }
}

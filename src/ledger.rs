//! The stats ledger: per-article counters that count each visitor identity at most once.
//!
//! Every increment is one `BEGIN IMMEDIATE` transaction that
//!
//! 1. lazily creates the counter row,
//! 2. inserts the `(identity, slug)` dedup record if it is absent,
//! 3. bumps the counter by one only if that insert happened,
//! 4. reads back the counters.
//!
//! The dedup tables double as the proof for the counters: `views` of a slug always equals the
//! number of rows for that slug in `view_dedup`, likewise for likes. Dedup records never expire.

use std::time::Duration;

use derive_new::new;
use rusqlite::{params, Connection};
use snafu::ResultExt;
use tracing::instrument;

use crate::database::{self, QuerySnafu, Store};
use crate::identity::Identity;
use crate::model::{ArticleStats, Slug};

/// The two independently deduplicated counters of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Like,
}

impl Action {
    fn claim(self) -> &'static str {
        match self {
            Self::View => {
                "INSERT INTO view_dedup (identity, slug) VALUES (?1, ?2) ON CONFLICT (identity, slug) DO NOTHING"
            }
            Self::Like => {
                "INSERT INTO like_dedup (identity, slug) VALUES (?1, ?2) ON CONFLICT (identity, slug) DO NOTHING"
            }
        }
    }

    fn bump(self) -> &'static str {
        match self {
            Self::View => "UPDATE article_stats SET views = views + 1 WHERE slug = ?1",
            Self::Like => "UPDATE article_stats SET likes = likes + 1 WHERE slug = ?1",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => f.write_str("view"),
            Self::Like => f.write_str("like"),
        }
    }
}

const ENSURE_ROW: &str = "INSERT INTO article_stats (slug) VALUES (?1) ON CONFLICT (slug) DO NOTHING";
const SELECT_STATS: &str = "SELECT views, likes FROM article_stats WHERE slug = ?1";

/// Exactly-once view and like counters, backed by a [Store].
///
/// There is no counter cache in this process: every call is a round trip to the database, so
/// any number of replicas can share one file.
#[derive(Debug, Clone, new)]
pub struct Ledger {
    store: Store,
    /// Deadline applied to every operation.
    deadline: Duration,
}

impl Ledger {
    /// Current counters of `slug`, creating a zeroed row the first time a slug is seen.
    #[instrument(skip_all, fields(%slug))]
    pub async fn stats(&self, slug: &Slug) -> database::Result<ArticleStats> {
        let slug = slug.clone();

        self.store
            .transaction(self.deadline, move |transaction| {
                transaction
                    .execute(ENSURE_ROW, params![slug.as_str()])
                    .context(QuerySnafu)?;

                select_stats(transaction, slug)
            })
            .await
    }

    /// Count a view of `slug` by `identity`, unless that identity was already counted.
    pub async fn record_view(
        &self, identity: &Identity, slug: &Slug,
    ) -> database::Result<ArticleStats> {
        self.record(Action::View, identity, slug).await
    }

    /// Count a like of `slug` by `identity`, unless that identity already liked it.
    pub async fn record_like(
        &self, identity: &Identity, slug: &Slug,
    ) -> database::Result<ArticleStats> {
        self.record(Action::Like, identity, slug).await
    }

    /// Count `action` on `slug` for `identity` at most once and return the resulting counters.
    ///
    /// A repeated call is a no-op that returns the unchanged counters. If anything fails the
    /// transaction rolls back as a whole, so the call can safely be retried.
    #[instrument(skip_all, fields(%action, %identity, %slug))]
    pub async fn record(
        &self, action: Action, identity: &Identity, slug: &Slug,
    ) -> database::Result<ArticleStats> {
        let identity = identity.to_string();
        let slug = slug.clone();

        let (stats, counted) = self
            .store
            .transaction(self.deadline, move |transaction| {
                transaction
                    .execute(ENSURE_ROW, params![slug.as_str()])
                    .context(QuerySnafu)?;

                let claimed = transaction
                    .execute(action.claim(), params![identity, slug.as_str()])
                    .context(QuerySnafu)?;

                let counted = claimed > 0;
                if counted {
                    transaction
                        .execute(action.bump(), params![slug.as_str()])
                        .context(QuerySnafu)?;
                }

                let stats = select_stats(transaction, slug)?;
                Ok((stats, counted))
            })
            .await?;

        if counted {
            tracing::debug!(views = stats.views, likes = stats.likes, "counted {action}");
        } else {
            tracing::debug!("{action} was already counted for this identity");
        }

        Ok(stats)
    }
}

fn select_stats(connection: &Connection, slug: Slug) -> database::Result<ArticleStats> {
    let (views, likes) = connection
        .query_row(SELECT_STATS, params![slug.as_str()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .context(QuerySnafu)?;

    Ok(ArticleStats::new(slug, views, likes))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use futures::future::join_all;
    use rusqlite::OptionalExtension;

    use super::*;

    impl Action {
        fn dedup_table(self) -> &'static str {
            match self {
                Self::View => "view_dedup",
                Self::Like => "like_dedup",
            }
        }
    }

    impl Ledger {
        /// Number of identities that have been counted for `action` on `slug`.
        async fn claims(&self, action: Action, slug: &Slug) -> database::Result<u64> {
            let query = format!("SELECT COUNT(*) FROM {} WHERE slug = ?1", action.dedup_table());
            let slug = slug.clone();

            self.store
                .transaction(self.deadline, move |transaction| {
                    transaction
                        .query_row(&query, params![slug.as_str()], |row| row.get(0))
                        .context(QuerySnafu)
                })
                .await
        }

        /// Whether `identity` has already been counted for `action` on `slug`.
        async fn has_claimed(
            &self, action: Action, identity: &Identity, slug: &Slug,
        ) -> database::Result<bool> {
            let query = format!(
                "SELECT 1 FROM {} WHERE identity = ?1 AND slug = ?2",
                action.dedup_table()
            );
            let identity = identity.to_string();
            let slug = slug.clone();

            self.store
                .transaction(self.deadline, move |transaction| {
                    let found: Option<i64> = transaction
                        .query_row(&query, params![identity, slug.as_str()], |row| row.get(0))
                        .optional()
                        .context(QuerySnafu)?;

                    Ok(found.is_some())
                })
                .await
        }

        async fn execute(&self, sql: &'static str) {
            self.store
                .transaction(self.deadline, move |transaction| {
                    transaction.execute_batch(sql).context(QuerySnafu)
                })
                .await
                .unwrap();
        }
    }

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("blog.db")).unwrap();
        (dir, Ledger::new(store, Duration::from_secs(10)))
    }

    fn slug(text: &str) -> Slug {
        text.parse().unwrap()
    }

    fn identity(text: &str) -> Identity {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn unseen_slug_has_zero_counters() {
        let (_dir, ledger) = ledger();

        let stats = ledger.stats(&slug("random-slug")).await.unwrap();
        assert_eq!(stats, ArticleStats::empty(slug("random-slug")));

        let again = ledger.stats(&slug("random-slug")).await.unwrap();
        assert_eq!(again, stats, "reading stats must not change them");
    }

    #[tokio::test]
    async fn first_like_counts() {
        let (_dir, ledger) = ledger();

        let stats = ledger
            .record_like(&identity("203.0.113.5"), &slug("random-slug"))
            .await
            .unwrap();

        assert_eq!(stats.slug, slug("random-slug"));
        assert_eq!(stats.likes, 1);
        assert_eq!(stats.views, 0);
    }

    #[tokio::test]
    async fn repeated_like_is_a_no_op() {
        let (_dir, ledger) = ledger();
        let visitor = identity("203.0.113.5");
        let article = slug("go-sqlite");

        let first = ledger.record_like(&visitor, &article).await.unwrap();
        assert_eq!(first.likes, 1);

        let second = ledger.record_like(&visitor, &article).await.unwrap();
        assert_eq!(second.likes, 1, "the dedup record must block the second like");
        assert!(ledger.has_claimed(Action::Like, &visitor, &article).await.unwrap());
        assert_eq!(ledger.claims(Action::Like, &article).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_view_is_a_no_op() {
        let (_dir, ledger) = ledger();
        let visitor = identity("198.51.100.20");
        let article = slug("random-slug");

        assert_eq!(ledger.record_view(&visitor, &article).await.unwrap().views, 1);
        assert_eq!(ledger.record_view(&visitor, &article).await.unwrap().views, 1);
    }

    #[tokio::test]
    async fn same_ipv6_prefix_counts_once() {
        let (_dir, ledger) = ledger();
        let article = slug("go-sqlite");

        let first = identity("2001:db8:1:1::1");
        let second = identity("2001:db8:1:1::2");
        assert_eq!(first.to_string(), "2001:db8:1:1::");
        assert_eq!(first, second);

        assert_eq!(ledger.record_view(&first, &article).await.unwrap().views, 1);
        assert_eq!(ledger.record_view(&second, &article).await.unwrap().views, 1);
    }

    #[tokio::test]
    async fn views_and_likes_are_independent() {
        let (_dir, ledger) = ledger();
        let visitor = identity("203.0.113.5");
        let article = slug("go-sqlite");

        let liked = ledger.record_like(&visitor, &article).await.unwrap();
        assert_eq!((liked.views, liked.likes), (0, 1));

        let viewed = ledger.record_view(&visitor, &article).await.unwrap();
        assert_eq!(
            (viewed.views, viewed.likes),
            (1, 1),
            "a like must not consume the view dedup record"
        );

        let liked_again = ledger.record_like(&visitor, &article).await.unwrap();
        assert_eq!((liked_again.views, liked_again.likes), (1, 1));
    }

    #[tokio::test]
    async fn dedup_is_per_article() {
        let (_dir, ledger) = ledger();
        let visitor = identity("203.0.113.5");

        ledger.record_view(&visitor, &slug("first")).await.unwrap();
        let other = ledger.record_view(&visitor, &slug("second")).await.unwrap();

        assert_eq!(other.views, 1);
        assert_eq!(ledger.stats(&slug("first")).await.unwrap().views, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_views_from_one_identity_count_once() {
        let (_dir, ledger) = ledger();
        let visitor = identity("203.0.113.5");
        let article = slug("go-sqlite");

        let tasks = (0..32).map(|_| {
            let ledger = ledger.clone();
            let article = article.clone();
            tokio::spawn(async move { ledger.record_view(&visitor, &article).await })
        });

        for result in join_all(tasks).await {
            let stats = result.unwrap().unwrap();
            assert_eq!(stats.views, 1);
        }

        assert_eq!(ledger.stats(&article).await.unwrap().views, 1);
        assert_eq!(ledger.claims(Action::View, &article).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_views_from_distinct_identities_all_count() {
        let (_dir, ledger) = ledger();
        let article = slug("go-sqlite");
        let visitors = 50u8;

        let tasks = (0..visitors).map(|n| {
            let ledger = ledger.clone();
            let article = article.clone();
            let visitor = identity(&format!("198.51.100.{n}"));
            tokio::spawn(async move { ledger.record_view(&visitor, &article).await })
        });

        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let stats = ledger.stats(&article).await.unwrap();
        assert_eq!(stats.views, u64::from(visitors));
        assert_eq!(stats.likes, 0);
        assert_eq!(
            ledger.claims(Action::View, &article).await.unwrap(),
            stats.views,
            "views must equal the number of view dedup records"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_likes_and_views_do_not_interfere() {
        let (_dir, ledger) = ledger();
        let article = slug("go-sqlite");

        let tasks = (0..20u8).map(|n| {
            let ledger = ledger.clone();
            let article = article.clone();
            let visitor = identity(&format!("203.0.113.{n}"));
            let action = if n % 2 == 0 { Action::View } else { Action::Like };
            tokio::spawn(async move { ledger.record(action, &visitor, &article).await })
        });

        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let stats = ledger.stats(&article).await.unwrap();
        assert_eq!((stats.views, stats.likes), (10, 10));
    }

    #[tokio::test]
    async fn counters_survive_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blog.db");
        let article = slug("go-sqlite");

        {
            let ledger = Ledger::new(Store::open(&path).unwrap(), Duration::from_secs(10));
            ledger
                .record_view(&identity("203.0.113.5"), &article)
                .await
                .unwrap();
        }

        let ledger = Ledger::new(Store::open(&path).unwrap(), Duration::from_secs(10));
        let stats = ledger
            .record_view(&identity("203.0.113.5"), &article)
            .await
            .unwrap();
        assert_eq!(stats.views, 1, "dedup records are durable");
    }

    #[tokio::test]
    async fn a_failed_increment_leaves_no_trace() {
        let (_dir, ledger) = ledger();
        let visitor = identity("203.0.113.5");
        let article = slug("go-sqlite");

        ledger
            .execute(
                "CREATE TRIGGER reject_updates BEFORE UPDATE ON article_stats \
                 BEGIN SELECT RAISE(ABORT, 'counter is read-only'); END",
            )
            .await;

        let result = ledger.record_view(&visitor, &article).await;
        assert!(result.is_err(), "the counter bump must fail");
        assert!(!ledger.has_claimed(Action::View, &visitor, &article).await.unwrap());
        assert_eq!(ledger.stats(&article).await.unwrap().views, 0);

        ledger.execute("DROP TRIGGER reject_updates").await;

        let retried = ledger.record_view(&visitor, &article).await.unwrap();
        assert_eq!(retried.views, 1, "a retry after a failure counts exactly once");
        assert_eq!(ledger.claims(Action::View, &article).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn an_increment_past_its_deadline_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blog.db");
        let store = Store::open(&path).unwrap();
        let visitor = identity("203.0.113.5");
        let article = slug("go-sqlite");

        // Another writer holds the database lock for longer than the deadline.
        let (locked, is_locked) = mpsc::channel();
        let writer = std::thread::spawn(move || {
            let other = rusqlite::Connection::open(&path).unwrap();
            other.execute_batch("BEGIN IMMEDIATE").unwrap();
            locked.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(600));
            other.execute_batch("COMMIT").unwrap();
        });
        is_locked.recv().unwrap();

        let impatient = Ledger::new(store.clone(), Duration::from_millis(100));
        let error = impatient.record_view(&visitor, &article).await.unwrap_err();
        assert!(error.is_timeout(), "unexpected error: {error}");

        writer.join().unwrap();

        let ledger = Ledger::new(store, Duration::from_secs(10));
        assert_eq!(ledger.stats(&article).await.unwrap().views, 0);
        assert!(!ledger.has_claimed(Action::View, &visitor, &article).await.unwrap());

        let retried = ledger.record_view(&visitor, &article).await.unwrap();
        assert_eq!(retried.views, 1);
    }

    #[test]
    fn action_names() {
        assert_eq!(Action::View.to_string(), "view");
        assert_eq!(Action::Like.to_string(), "like");
    }
}

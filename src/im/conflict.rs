//! Optimistic concurrency: write, and on a UNIQUE conflict re-read the winner
//!
//! Every write path that can race another writer for the same unique key goes
//! through [`resolve_on_conflict`]. No locks are taken; the unique constraint is
//! the only arbiter.

use std::future::Future;

use tracing::debug;

use crate::im::error::{ChatError, Result};

/// Outcome of a conflict-resolved write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    /// Our write committed
    Written(T),
    /// Another writer got there first; this is the row it committed
    Existing(T),
}

impl<T> Resolved<T> {
    pub fn into_inner(self) -> T {
        match self {
            Resolved::Written(v) | Resolved::Existing(v) => v,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, Resolved::Written(_))
    }
}

/// Run `write`; if it fails on a unique constraint, run `reread` and return the
/// row that won instead of the error.
///
/// Errors other than unique violations propagate unchanged. A conflict whose
/// re-read comes back empty (the winner was deleted in between) is reported as
/// [`ChatError::Conflict`].
pub async fn resolve_on_conflict<T, W, WF, R, RF>(
    what: &'static str,
    write: W,
    reread: R,
) -> Result<Resolved<T>>
where
    W: FnOnce() -> WF,
    WF: Future<Output = Result<T>>,
    R: FnOnce() -> RF,
    RF: Future<Output = Result<Option<T>>>,
{
    match write().await {
        Ok(value) => Ok(Resolved::Written(value)),
        Err(err) if err.is_unique_violation() => {
            debug!("[Conflict] {} lost a unique race, re-reading", what);
            match reread().await? {
                Some(existing) => Ok(Resolved::Existing(existing)),
                None => Err(ChatError::Conflict(format!(
                    "{what}: conflicting row vanished before re-read"
                ))),
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::db::create_memory_pool;
    use crate::im::error::DbResultExt;

    #[tokio::test]
    async fn unique_violation_turns_into_reread() {
        let pool = create_memory_pool().await.unwrap();
        sqlx::query("INSERT INTO identities (id, token, created_at) VALUES ('a', 't', 0)")
            .execute(&pool)
            .await
            .unwrap();

        let outcome = resolve_on_conflict(
            "identity insert",
            || async {
                sqlx::query("INSERT INTO identities (id, token, created_at) VALUES ('a', 't2', 1)")
                    .execute(&pool)
                    .await
                    .context("inserting identity")
                    .map(|_| "mine".to_string())
            },
            || async { Ok(Some("theirs".to_string())) },
        )
        .await
        .unwrap();

        assert_eq!(outcome, Resolved::Existing("theirs".to_string()));
        assert!(!outcome.was_written());
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        let result: Result<Resolved<()>> = resolve_on_conflict(
            "failing write",
            || async { Err(ChatError::Validation("nope".into())) },
            || async { Ok(Some(())) },
        )
        .await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn vanished_winner_is_a_conflict() {
        let pool = create_memory_pool().await.unwrap();
        sqlx::query("INSERT INTO identities (id, token, created_at) VALUES ('a', 't', 0)")
            .execute(&pool)
            .await
            .unwrap();

        let result: Result<Resolved<()>> = resolve_on_conflict(
            "identity insert",
            || async {
                sqlx::query("INSERT INTO identities (id, token, created_at) VALUES ('b', 't', 1)")
                    .execute(&pool)
                    .await
                    .context("inserting identity")
                    .map(|_| ())
            },
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(result, Err(ChatError::Conflict(_))));
    }
}

//! 最初のエラーで全体をキャンセルするタスクグループ

use crate::error::{BuildError, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// まとめて動き、まとめて止まるタスクの集合
///
/// 最初に失敗したタスクがグループのトークンをキャンセルする。`wait` は全タスクの
/// 終了を待ってから、その最初のエラーを返す。
pub struct TaskGroup {
    tasks: JoinSet<(&'static str, Result<()>)>,
    token: CancellationToken,
}

impl TaskGroup {
    /// `parent` の子トークンを持つグループ
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            token: parent.child_token(),
        }
    }

    /// 親のキャンセルかタスクの失敗でキャンセルされるトークン
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        tracing::debug!(task = name, "spawning task");
        self.tasks.spawn(async move { (name, task.await) });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 全タスクを待ち、最初のエラーを返す
    pub async fn wait(mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => ("<unknown>", Err(BuildError::Task(e.to_string()))),
            };

            match result {
                Ok(()) => tracing::debug!(task = name, "task finished"),
                Err(e) => {
                    if first_error.is_none() {
                        tracing::debug!(task = name, error = %e, "task failed, cancelling group");
                        self.token.cancel();
                        first_error = Some(e);
                    } else {
                        tracing::debug!(task = name, error = %e, "task failed after cancellation");
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let mut group = TaskGroup::new(&CancellationToken::new());
        for _ in 0..3 {
            group.spawn("ok", async { Ok(()) });
        }
        assert_eq!(group.len(), 3);
        tokio_test::assert_ok!(group.wait().await);
    }

    #[tokio::test]
    async fn test_first_error_cancels_siblings() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);
        let token = group.token();
        let sibling_saw_cancel = Arc::new(AtomicBool::new(false));

        let seen = sibling_saw_cancel.clone();
        group.spawn("sibling", async move {
            token.cancelled().await;
            seen.store(true, Ordering::SeqCst);
            Err(BuildError::Cancelled)
        });
        group.spawn("failing", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(BuildError::Transport("connection reset".into()))
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, BuildError::Transport(_)));
        assert!(sibling_saw_cancel.load(Ordering::SeqCst));
        // グループの失敗は呼び出し元をキャンセルしない
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_group() {
        let parent = CancellationToken::new();
        let mut group = TaskGroup::new(&parent);
        let token = group.token();
        group.spawn("waiter", async move {
            token.cancelled().await;
            Ok(())
        });
        parent.cancel();
        tokio_test::assert_ok!(group.wait().await);
    }

    #[tokio::test]
    async fn test_panic_becomes_task_error() {
        let mut group = TaskGroup::new(&CancellationToken::new());
        group.spawn("panics", async { panic!("boom") });
        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, BuildError::Task(_)));
    }
}

//! BuildKit セッションのオーケストレーション
//!
//! 1回のビルドは4つのタスクを1つの [`TaskGroup`] で並行実行する。
//!
//! 1. **session**: ファイル同期と認証情報を提供するトランスポートを、セッション終了まで動かす
//! 2. **build**: ビルド要求を発行し、応答ストリームをデコードしてイベントを転送する
//! 3. **cancel**: グループのキャンセルを監視し、ビルド完了前なら一度だけリモートのキャンセルを送る
//! 4. **progress**: イベントを [`ProgressRenderer`] に渡す
//!
//! どれかが失敗するとグループ全体がキャンセルされ、全タスクの終了後に最初のエラーが返る。

use crate::auth::CredentialCache;
use crate::decoder::{BuildEvent, decode_stream};
use crate::error::{BuildError, Result};
use crate::group::TaskGroup;
use crate::progress::ProgressRenderer;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// イベントチャネルのデフォルト容量
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    SyncingContext,
    AwaitingRemoteBuild,
    StreamingEvents,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::SyncingContext => "syncing-context",
            Self::AwaitingRemoteBuild => "awaiting-remote-build",
            Self::StreamingEvents => "streaming-events",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// ビルド要求
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub session_id: String,
    pub build_id: String,
    /// ビルドコンテキストのディレクトリ
    pub context_dir: PathBuf,
    /// Dockerfile のパス
    pub dockerfile: PathBuf,
    /// `domain/repo:tag`
    pub tag: String,
    pub build_args: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub platform: Option<String>,
    pub target: Option<String>,
    pub no_cache: bool,
    pub pull: bool,
}

impl BuildRequest {
    pub fn new(
        context_dir: impl Into<PathBuf>,
        dockerfile: impl Into<PathBuf>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            build_id: uuid::Uuid::new_v4().to_string(),
            context_dir: context_dir.into(),
            dockerfile: dockerfile.into(),
            tag: tag.into(),
            build_args: HashMap::new(),
            labels: HashMap::new(),
            platform: None,
            target: None,
            no_cache: false,
            pull: false,
        }
    }

    /// Dockerfile のファイル名（エンジンに渡す名前）
    pub fn dockerfile_name(&self) -> String {
        self.dockerfile
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Dockerfile".to_string())
    }

    /// Dockerfile を含むディレクトリ
    pub fn dockerfile_dir(&self) -> PathBuf {
        match self.dockerfile.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => self.context_dir.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.context_dir.is_dir() {
            return Err(BuildError::ContextNotFound(self.context_dir.clone()));
        }
        if !self.dockerfile.is_file() {
            return Err(BuildError::DockerfileNotFound(self.dockerfile.clone()));
        }
        Ok(())
    }
}

/// セッションで公開するディレクトリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedDir {
    pub name: &'static str,
    pub path: PathBuf,
    /// 送信時に uid/gid を 0 に揃える
    pub reset_ownership: bool,
}

/// リモートビルダーに提供するもの
pub struct SessionContext {
    pub session_id: String,
    pub synced_dirs: Vec<SyncedDir>,
    pub credentials: Arc<CredentialCache>,
}

impl SessionContext {
    fn for_request(request: &BuildRequest, credentials: Arc<CredentialCache>) -> Self {
        Self {
            session_id: request.session_id.clone(),
            synced_dirs: vec![
                SyncedDir {
                    name: "context",
                    path: request.context_dir.clone(),
                    reset_ownership: true,
                },
                SyncedDir {
                    name: "dockerfile",
                    path: request.dockerfile_dir(),
                    reset_ownership: false,
                },
            ],
            credentials,
        }
    }

    pub fn dir(&self, name: &str) -> Option<&Path> {
        self.synced_dirs
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.path.as_path())
    }
}

/// ビルド応答の生バイト列
pub type ResponseStream = BoxStream<'static, Result<Bytes>>;

/// リモートのビルドエンジン
#[async_trait]
pub trait BuildDaemon: Send + Sync {
    /// ビルドを開始し、改行区切り JSON の応答ストリームを返す
    async fn solve(&self, request: &BuildRequest, session: &SessionContext)
    -> Result<ResponseStream>;

    /// 実行中のビルドを中止する。呼び出し後、`solve` のストリームは終了しなければならない
    async fn cancel(&self, build_id: &str) -> Result<()>;
}

/// セッションのトランスポート（ファイル同期・認証情報の提供）
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// `shutdown` が発火するまでセッションを提供する
    async fn serve(&self, session: Arc<SessionContext>, shutdown: CancellationToken) -> Result<()>;
}

/// 成功したビルドの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub build_id: String,
    pub image_id: Option<String>,
}

/// 1回のビルド呼び出し
pub struct BuildSession {
    daemon: Arc<dyn BuildDaemon>,
    transport: Arc<dyn SessionTransport>,
    credentials: Arc<CredentialCache>,
    state: Arc<watch::Sender<SessionState>>,
    event_buffer: usize,
}

impl BuildSession {
    pub fn new(
        daemon: Arc<dyn BuildDaemon>,
        transport: Arc<dyn SessionTransport>,
        credentials: Arc<CredentialCache>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            daemon,
            transport,
            credentials,
            state: Arc::new(state),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// イベントチャネルの容量を変更する（最小1）
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, next: SessionState) {
        tracing::info!(state = %next, "build session state");
        self.state.send_replace(next);
    }

    /// ビルドを実行する
    ///
    /// `cancel` が発火すると `BuildError::Cancelled` で終わる。
    pub async fn run(
        &self,
        request: BuildRequest,
        renderer: Box<dyn ProgressRenderer>,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome> {
        if let Err(e) = request.validate() {
            self.transition(SessionState::Failed);
            return Err(e);
        }

        self.transition(SessionState::SyncingContext);
        let session = Arc::new(SessionContext::for_request(
            &request,
            self.credentials.clone(),
        ));
        tracing::debug!(
            session_id = %request.session_id,
            build_id = %request.build_id,
            context = %request.context_dir.display(),
            "starting build session"
        );

        let request = Arc::new(request);
        let mut group = TaskGroup::new(cancel);
        let session_close = group.token().child_token();
        let build_done = CancellationToken::new();
        let acked = CancellationToken::new();
        let succeeded = Arc::new(AtomicBool::new(false));
        let image_id = Arc::new(OnceLock::new());
        let (tx, rx) = mpsc::channel(self.event_buffer);

        group.spawn("session", {
            let transport = self.transport.clone();
            let session = session.clone();
            let shutdown = session_close.clone();
            async move { transport.serve(session, shutdown).await }
        });

        group.spawn("build", {
            let daemon = self.daemon.clone();
            let request = request.clone();
            let session = session.clone();
            let state = self.state.clone();
            let session_close = session_close.clone();
            let build_done = build_done.clone();
            let acked = acked.clone();
            let succeeded = succeeded.clone();
            let image_id = image_id.clone();
            async move {
                let _close_session = session_close.drop_guard();
                let _build_done = build_done.drop_guard();

                state.send_replace(SessionState::AwaitingRemoteBuild);
                let body = tokio::select! {
                    biased;
                    _ = acked.cancelled() => return Err(BuildError::Cancelled),
                    body = daemon.solve(&request, &session) => body?,
                };

                state.send_replace(SessionState::StreamingEvents);
                let mut events = Box::pin(decode_stream(body));
                while let Some(event) = events.next().await {
                    let event = event?;
                    if let BuildEvent::ImageId(id) = &event {
                        let _ = image_id.set(id.clone());
                    }
                    // キャンセル確認後はストリームの終端まで読み捨てる
                    if acked.is_cancelled() {
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = acked.cancelled() => {}
                        sent = tx.send(event) => {
                            if sent.is_err() {
                                tracing::debug!("progress receiver closed");
                            }
                        }
                    }
                }

                if acked.is_cancelled() {
                    return Err(BuildError::Cancelled);
                }
                succeeded.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        group.spawn("cancel", {
            let daemon = self.daemon.clone();
            let build_id = request.build_id.clone();
            let token = group.token();
            let build_done = build_done.clone();
            let acked = acked.clone();
            async move {
                tokio::select! {
                    biased;
                    _ = build_done.cancelled() => return Ok(()),
                    _ = token.cancelled() => {}
                }
                tracing::info!(build_id = %build_id, "cancelling remote build");
                if let Err(e) = daemon.cancel(&build_id).await {
                    tracing::warn!(build_id = %build_id, error = %e, "failed to cancel remote build");
                }
                acked.cancel();
                Ok(())
            }
        });

        group.spawn("progress", {
            let acked = acked.clone();
            let succeeded = succeeded.clone();
            let mut rx = rx;
            let mut renderer = renderer;
            async move {
                while let Some(event) = rx.recv().await {
                    if acked.is_cancelled() {
                        continue;
                    }
                    renderer.event(&event);
                }
                renderer.finish(succeeded.load(Ordering::SeqCst));
                Ok(())
            }
        });

        let result = group.wait().await;
        let final_state = match &result {
            _ if cancel.is_cancelled() => SessionState::Cancelled,
            Ok(()) => SessionState::Completed,
            Err(BuildError::Cancelled) => SessionState::Cancelled,
            Err(_) => SessionState::Failed,
        };
        self.transition(final_state);

        match (final_state, result) {
            (SessionState::Completed, _) => Ok(BuildOutcome {
                build_id: request.build_id.clone(),
                image_id: image_id.get().cloned(),
            }),
            (SessionState::Cancelled, _) => Err(BuildError::Cancelled),
            (_, Err(e)) => Err(e),
            (_, Ok(())) => Err(BuildError::Task("build ended without a result".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialSource;
    use crate::decoder::TRACE_ID;
    use futures_util::stream;
    use hoist_registry::Credentials;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct NoCredentials;

    #[async_trait]
    impl CredentialSource for NoCredentials {
        async fn lookup(&self, _host: &str) -> Result<Option<Credentials>> {
            Ok(None)
        }
        async fn host_of(&self, _image: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakeDaemon {
        lines: Vec<String>,
        /// キャンセルされるまでストリームを閉じない
        hang: bool,
        /// キャンセル後に流す行
        late_lines: Vec<String>,
        gate: Option<Arc<Notify>>,
        stop: CancellationToken,
        cancels: AtomicUsize,
    }

    fn to_body(lines: Vec<String>) -> impl futures_util::Stream<Item = Result<Bytes>> {
        stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(format!("{l}\n")))))
    }

    #[async_trait]
    impl BuildDaemon for FakeDaemon {
        async fn solve(
            &self,
            request: &BuildRequest,
            session: &SessionContext,
        ) -> Result<ResponseStream> {
            assert_eq!(session.session_id, request.session_id);
            assert_eq!(session.dir("context"), Some(request.context_dir.as_path()));
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let head = to_body(self.lines.clone());
            if !self.hang {
                return Ok(head.boxed());
            }
            let stop = self.stop.clone();
            let late = self.late_lines.clone();
            let tail = stream::once(async move {
                stop.cancelled().await;
                to_body(late)
            })
            .flatten();
            Ok(head.chain(tail).boxed())
        }

        async fn cancel(&self, _build_id: &str) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            let stop = self.stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stop.cancel();
            });
            Ok(())
        }
    }

    struct IdleTransport;

    #[async_trait]
    impl SessionTransport for IdleTransport {
        async fn serve(&self, _session: Arc<SessionContext>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl SessionTransport for BrokenTransport {
        async fn serve(&self, _session: Arc<SessionContext>, _shutdown: CancellationToken) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(BuildError::Transport("session hijack failed".into()))
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<BuildEvent>>>,
        finished: Arc<Mutex<Option<bool>>>,
    }

    impl ProgressRenderer for Recorder {
        fn event(&mut self, event: &BuildEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
        fn finish(&mut self, success: bool) {
            *self.finished.lock().unwrap() = Some(success);
        }
    }

    impl Recorder {
        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        request: BuildRequest,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        std::fs::write(&dockerfile, "FROM alpine\n").unwrap();
        let request = BuildRequest::new(dir.path(), &dockerfile, "app:dev");
        Fixture { _dir: dir, request }
    }

    fn session(daemon: Arc<FakeDaemon>, transport: Arc<dyn SessionTransport>) -> BuildSession {
        let credentials = Arc::new(CredentialCache::new(Arc::new(NoCredentials)));
        BuildSession::new(daemon, transport, credentials).with_event_buffer(1)
    }

    fn trace_line(digest: &str) -> String {
        format!(
            r#"{{"id":"{}","aux":{{"vertexes":[{{"digest":"{}","name":"step {}"}}]}}}}"#,
            TRACE_ID, digest, digest
        )
    }

    fn stream_line(text: &str) -> String {
        format!(r#"{{"stream":"{}"}}"#, text)
    }

    #[tokio::test]
    async fn test_successful_build_delivers_events_in_order() {
        let fx = fixture();
        let daemon = Arc::new(FakeDaemon {
            lines: vec![
                trace_line("a"),
                stream_line("one"),
                trace_line("b"),
                stream_line("two"),
                r#"{"aux":{"ID":"sha256:feed"}}"#.to_string(),
            ],
            ..Default::default()
        });
        let recorder = Recorder::default();
        let build = session(daemon.clone(), Arc::new(IdleTransport));

        let outcome = build
            .run(fx.request, Box::new(recorder.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.image_id.as_deref(), Some("sha256:feed"));
        assert_eq!(build.state(), SessionState::Completed);
        assert_eq!(daemon.cancels.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.finished.lock().unwrap(), Some(true));

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], BuildEvent::Progress(s) if s.vertexes[0].digest == "a"));
        assert_eq!(events[1], BuildEvent::Display("one".into()));
        assert!(matches!(&events[2], BuildEvent::Progress(s) if s.vertexes[0].digest == "b"));
        assert_eq!(events[3], BuildEvent::Display("two".into()));
    }

    #[tokio::test]
    async fn test_inline_error_fails_without_remote_cancel() {
        let fx = fixture();
        let daemon = Arc::new(FakeDaemon {
            lines: vec![
                stream_line("one"),
                r#"{"errorDetail":{"message":"RUN false: exit code 1"},"error":"RUN false: exit code 1"}"#
                    .to_string(),
            ],
            ..Default::default()
        });
        let recorder = Recorder::default();
        let build = session(daemon.clone(), Arc::new(IdleTransport));

        let err = build
            .run(fx.request, Box::new(recorder.clone()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::BuildFailed(ref m) if m.contains("exit code 1")));
        assert_eq!(build.state(), SessionState::Failed);
        assert_eq!(daemon.cancels.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.finished.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_transport_failure_cancels_remote_build_once() {
        let fx = fixture();
        let daemon = Arc::new(FakeDaemon {
            lines: vec![stream_line("one")],
            hang: true,
            ..Default::default()
        });
        let build = session(daemon.clone(), Arc::new(BrokenTransport));

        let err = build
            .run(fx.request, Box::new(Recorder::default()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Transport(_)));
        assert_eq!(build.state(), SessionState::Failed);
        assert_eq!(daemon.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_caller_cancel_stops_delivery() {
        let fx = fixture();
        let daemon = Arc::new(FakeDaemon {
            lines: vec![stream_line("one"), stream_line("two")],
            hang: true,
            late_lines: vec![stream_line("late-1"), stream_line("late-2")],
            ..Default::default()
        });
        let recorder = Recorder::default();
        let build = Arc::new(session(daemon.clone(), Arc::new(IdleTransport)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let build = build.clone();
            let recorder = recorder.clone();
            let cancel = cancel.clone();
            async move { build.run(fx.request, Box::new(recorder), &cancel).await }
        });

        while recorder.count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(build.state(), SessionState::Cancelled);
        assert_eq!(daemon.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.count(), 2);
        assert_eq!(*recorder.finished.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let fx = fixture();
        let gate = Arc::new(Notify::new());
        let daemon = Arc::new(FakeDaemon {
            lines: vec![stream_line("one")],
            hang: true,
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let recorder = Recorder::default();
        let build = Arc::new(session(daemon.clone(), Arc::new(IdleTransport)));
        let mut states = build.subscribe();
        assert_eq!(*states.borrow(), SessionState::Created);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let build = build.clone();
            let recorder = recorder.clone();
            let cancel = cancel.clone();
            async move { build.run(fx.request, Box::new(recorder), &cancel).await }
        });

        states
            .wait_for(|s| *s == SessionState::AwaitingRemoteBuild)
            .await
            .unwrap();
        gate.notify_one();
        states
            .wait_for(|s| *s == SessionState::StreamingEvents)
            .await
            .unwrap();

        // 正常終了させる
        daemon.stop.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(*states.borrow(), SessionState::Completed);
        assert!(build.state().is_terminal());
    }

    #[tokio::test]
    async fn test_missing_context_fails_before_session() {
        let daemon = Arc::new(FakeDaemon::default());
        let build = session(daemon, Arc::new(IdleTransport));
        let request = BuildRequest::new("/nonexistent/ctx", "/nonexistent/ctx/Dockerfile", "app:dev");

        let err = build
            .run(request, Box::new(Recorder::default()), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::ContextNotFound(_)));
        assert_eq!(build.state(), SessionState::Failed);
    }

    #[test]
    fn test_request_paths() {
        let request = BuildRequest::new("/src/app", "/src/app/docker/Dockerfile.prod", "app:dev");
        assert_eq!(request.dockerfile_name(), "Dockerfile.prod");
        assert_eq!(request.dockerfile_dir(), PathBuf::from("/src/app/docker"));
        assert_ne!(request.session_id, request.build_id);
    }
}

//! Docker Engine アダプタ
//!
//! エンジンの BuildKit ビルダーでビルドする。セッションはエンジン自身が開くため、
//! コンテキストのアーカイブはリクエストボディで送り、認証情報は認証アドレスを
//! キーにして事前に渡す。エンジンの出力は [`decode_stream`] 用の応答行に変換する。
//!
//! [`decode_stream`]: crate::decoder::decode_stream

use crate::auth::docker_credentials;
use crate::context::ContextBuilder;
use crate::decoder::{
    ErrorDetail, JsonMessage, SolveStatus, Vertex, VertexLog, VertexStatus, encode_line,
    trace_message,
};
use crate::dockerfile::extract_base_images;
use crate::error::{BuildError, Result};
use crate::puller::ImagePuller;
use crate::session::{BuildDaemon, BuildRequest, ResponseStream, SessionContext, SessionTransport};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::{BuildInfo, BuildInfoAux};
use bollard::moby::buildkit::v1::StatusResponse;
use bollard::query_parameters::{BuildImageOptions, BuilderVersion};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use hoist_registry::Image;
use http_body_util::{Either, Full};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const RESPONSE_BUFFER: usize = 64;

/// ローカルまたはリモートの Docker Engine を使う [`BuildDaemon`]
pub struct DockerDaemon {
    docker: Docker,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
    quiet: bool,
}

impl DockerDaemon {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            running: Arc::new(Mutex::new(HashMap::new())),
            quiet: false,
        }
    }

    /// pull の進捗表示を抑制
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn register(&self, build_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(build_id.to_string(), token.clone());
        token
    }

    fn unregister(&self, build_id: &str) -> Option<CancellationToken> {
        remove_build(&self.running, build_id)
    }

    async fn pull_base_images(&self, images: &[String], session: &SessionContext) -> Result<()> {
        let puller = ImagePuller::new(self.docker.clone()).quiet(self.quiet);
        for reference in images {
            let credentials = session.credentials.credentials_for_image(reference).await?;
            puller.pull(&Image::parse(reference), &credentials).await?;
        }
        Ok(())
    }

    /// コンテキストをアーカイブし、エンジンへのリクエストに必要なものを揃える
    async fn prepare(&self, request: &BuildRequest, session: &SessionContext) -> Result<Prepared> {
        let context_dir = session
            .dir("context")
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| request.context_dir.clone());
        let reset_ownership = session
            .synced_dirs
            .iter()
            .any(|d| d.name == "context" && d.reset_ownership);

        let dockerfile = tokio::fs::read_to_string(&request.dockerfile)
            .await
            .map_err(|_| BuildError::DockerfileNotFound(request.dockerfile.clone()))?;
        let base_images = extract_base_images(&dockerfile, &request.build_args)?;

        let builder = ContextBuilder::new(context_dir, request.dockerfile.clone())
            .labels(request.labels.clone())
            .reset_ownership(reset_ownership);
        let archive = tokio::task::spawn_blocking(move || builder.build())
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;
        tracing::debug!(
            entries = archive.entries,
            bytes = archive.data.len(),
            dockerfile = %archive.dockerfile,
            "build context ready"
        );

        let credentials: HashMap<_, _> = session
            .credentials
            .prefetch(&base_images)
            .await?
            .iter()
            .map(|(address, c)| (address.clone(), docker_credentials(c)))
            .collect();

        if request.pull {
            self.pull_base_images(&base_images, session).await?;
        }

        let options = BuildImageOptions {
            t: Some(request.tag.clone()),
            dockerfile: archive.dockerfile.clone(),
            version: BuilderVersion::BuilderBuildKit,
            session: Some(session.session_id.clone()),
            rm: true,
            nocache: request.no_cache,
            buildargs: Some(request.build_args.clone()),
            platform: request.platform.clone().unwrap_or_default(),
            target: request.target.clone().unwrap_or_default(),
            ..Default::default()
        };

        Ok(Prepared {
            options,
            credentials: (!credentials.is_empty()).then_some(credentials),
            archive: Bytes::from(archive.data),
        })
    }
}

struct Prepared {
    options: BuildImageOptions,
    credentials: Option<HashMap<String, DockerCredentials>>,
    archive: Bytes,
}

#[async_trait]
impl BuildDaemon for DockerDaemon {
    async fn solve(
        &self,
        request: &BuildRequest,
        session: &SessionContext,
    ) -> Result<ResponseStream> {
        // コンテキストの準備中にキャンセルされることがある
        let stop = self.register(&request.build_id);
        let Prepared {
            options,
            credentials,
            archive,
        } = match tokio::select! {
            biased;
            _ = stop.cancelled() => Err(BuildError::Cancelled),
            prepared = self.prepare(request, session) => prepared,
        } {
            Ok(prepared) if !stop.is_cancelled() => prepared,
            other => {
                self.unregister(&request.build_id);
                let err = other.err().unwrap_or(BuildError::Cancelled);
                tracing::debug!(build_id = %request.build_id, error = %err, "engine build not started");
                return Err(err);
            }
        };

        let body: Either<Full<Bytes>, _> = Either::Left(Full::new(archive));
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(RESPONSE_BUFFER);
        let docker = self.docker.clone();
        let running = self.running.clone();
        let build_id = request.build_id.clone();

        // エンジンのストリームを破棄すると接続が閉じ、ビルドも中止される
        tokio::spawn(async move {
            let mut engine = Box::pin(docker.build_image(options, credentials, Some(body)));
            loop {
                let info = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    info = engine.next() => info,
                };
                let Some(info) = info else { break };
                let line = match info {
                    Ok(info) => encode_build_info(info),
                    Err(e) => Err(BuildError::DockerConnection(e)),
                };
                let failed = line.is_err();
                if tx.send(line).await.is_err() || failed {
                    break;
                }
            }
            remove_build(&running, &build_id);
            tracing::debug!(build_id = %build_id, "engine stream closed");
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (line, rx))
        });
        Ok(stream.boxed())
    }

    async fn cancel(&self, build_id: &str) -> Result<()> {
        match self.unregister(build_id) {
            Some(token) => {
                tracing::debug!(build_id, "closing build stream");
                token.cancel();
            }
            None => tracing::debug!(build_id, "build already finished"),
        }
        Ok(())
    }
}

fn remove_build(
    running: &Mutex<HashMap<String, CancellationToken>>,
    build_id: &str,
) -> Option<CancellationToken> {
    running
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(build_id)
}

/// エンジンのメッセージを応答の1行に変換
fn encode_build_info(info: BuildInfo) -> Result<Bytes> {
    let mut message = JsonMessage {
        id: info.id,
        stream: info.stream,
        status: info.status,
        ..Default::default()
    };

    if let Some(detail) = info.error_detail {
        message.error = detail.message.clone();
        message.error_detail = Some(ErrorDetail {
            message: detail.message,
        });
    }

    match info.aux {
        Some(BuildInfoAux::Default(image)) => {
            message.aux = image.id.map(|id| serde_json::json!({ "ID": id }));
        }
        Some(BuildInfoAux::BuildKit(status)) => {
            let trace = trace_message(&solve_status(&status))?;
            message.id = trace.id;
            message.aux = trace.aux;
        }
        None => {}
    }

    encode_line(&message)
}

fn to_time(seconds: i64, nanos: i32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds, u32::try_from(nanos).unwrap_or(0))
}

/// エンジンの protobuf 形式から BuildKit の status へ
fn solve_status(status: &StatusResponse) -> SolveStatus {
    SolveStatus {
        vertexes: status
            .vertexes
            .iter()
            .map(|v| Vertex {
                digest: v.digest.clone(),
                inputs: v.inputs.clone(),
                name: v.name.clone(),
                started: v.started.as_ref().and_then(|t| to_time(t.seconds, t.nanos)),
                completed: v.completed.as_ref().and_then(|t| to_time(t.seconds, t.nanos)),
                error: v.error.clone(),
                cached: v.cached,
            })
            .collect(),
        statuses: status
            .statuses
            .iter()
            .map(|s| VertexStatus {
                id: s.id.clone(),
                vertex: s.vertex.clone(),
                name: s.name.clone(),
                total: s.total,
                current: s.current,
                timestamp: s.timestamp.as_ref().and_then(|t| to_time(t.seconds, t.nanos)),
                started: s.started.as_ref().and_then(|t| to_time(t.seconds, t.nanos)),
                completed: s.completed.as_ref().and_then(|t| to_time(t.seconds, t.nanos)),
            })
            .collect(),
        logs: status
            .logs
            .iter()
            .map(|l| VertexLog {
                vertex: l.vertex.clone(),
                stream: l.stream,
                data: l.msg.clone(),
                timestamp: l.timestamp.as_ref().and_then(|t| to_time(t.seconds, t.nanos)),
            })
            .collect(),
    }
}

/// セッションをエンジン自身が処理する場合のトランスポート
///
/// Docker Engine はコンテキストをリクエストボディから受け取り、認証情報も
/// ビルド時に渡したマップから答えるため、ここではセッションを開いておくだけ。
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTransport;

#[async_trait]
impl SessionTransport for InlineTransport {
    async fn serve(&self, session: Arc<SessionContext>, shutdown: CancellationToken) -> Result<()> {
        tracing::debug!(session_id = %session.session_id, "session open");
        shutdown.cancelled().await;
        tracing::debug!(session_id = %session.session_id, "session closed");
        Ok(())
    }
}

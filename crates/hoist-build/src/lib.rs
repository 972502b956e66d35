//! hoist-build: BuildKit によるイメージビルド
//!
//! ビルドコンテキストの作成、BuildKit セッションの並行実行、
//! ビルド出力のデコードと進捗表示、レジストリへのプッシュを提供する。
//!
//! # 構成
//!
//! - [`BuildSession`]: セッション・ビルド・キャンセル・進捗の4タスクを束ねる
//! - [`CredentialCache`]: セッション中のレジストリ認証情報（ホスト単位で1回だけ取得）
//! - [`DockerDaemon`]: Docker Engine の BuildKit ビルダーへのアダプタ
//! - [`ImagePusher`] / [`ImagePuller`]: レジストリとのイメージ転送

pub mod auth;
pub mod context;
pub mod decoder;
pub mod docker;
pub mod dockerfile;
pub mod error;
pub mod group;
pub mod progress;
pub mod puller;
pub mod pusher;
pub mod session;

pub use auth::{CredentialCache, CredentialSource};
pub use context::{ContextArchive, ContextBuilder};
pub use decoder::{BuildEvent, SolveStatus};
pub use docker::{DockerDaemon, InlineTransport};
pub use error::{BuildError, Result};
pub use group::TaskGroup;
pub use progress::{ConsoleRenderer, ProgressRenderer, QuietRenderer};
pub use puller::ImagePuller;
pub use pusher::{ImagePusher, validate_tag};
pub use session::{BuildDaemon, BuildOutcome, BuildRequest, BuildSession, SessionState, SessionTransport};

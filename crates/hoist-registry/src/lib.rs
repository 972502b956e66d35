//! hoist-registry: コンテナレジストリの抽象化
//!
//! 複数のクラウドレジストリ（Alibaba Cloud、Alibaba Cloud Enterprise、
//! Amazon ECR、Docker Hub 互換）を一つの契約 [`RegistryBackend`] で扱う。
//!
//! # 概要
//!
//! - **Image**: `domain/repo:tag` のパースと整形
//! - **Backend**: プロバイダごとの認証・リポジトリ作成・タグ取得
//! - **Resolver**: イメージ参照から所有バックエンドを解決

mod acs;
pub mod aggregate;
pub mod backend;
pub mod credentials;
pub mod error;
pub mod image;
pub mod model;
pub mod parser;
pub mod resolver;

pub use aggregate::*;
pub use backend::*;
pub use credentials::*;
pub use error::*;
pub use image::*;
pub use model::*;
pub use parser::*;
pub use resolver::*;

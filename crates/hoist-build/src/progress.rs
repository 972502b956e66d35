//! ビルド進捗の集約と表示
//!
//! デコード済みの [`BuildEvent`] を [`ProgressGraph`] に蓄積し、
//! [`ProgressRenderer`] で端末に描画する。

use crate::decoder::{BuildEvent, SolveStatus, Vertex, VertexLog, VertexStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;

/// ビルドグラフの現在の状態
///
/// 頂点は digest ごとに最新の観測で上書きし、ログは到着順に保持する。
#[derive(Debug, Default)]
pub struct ProgressGraph {
    order: Vec<String>,
    vertexes: HashMap<String, Vertex>,
    statuses: HashMap<String, VertexStatus>,
    logs: Vec<VertexLog>,
}

impl ProgressGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新を取り込み、新しく完了した頂点を返す
    pub fn apply(&mut self, status: &SolveStatus) -> Vec<Vertex> {
        let mut completed = Vec::new();

        for vertex in &status.vertexes {
            let was_done = self
                .vertexes
                .get(&vertex.digest)
                .is_some_and(|v| v.completed.is_some());
            if !self.vertexes.contains_key(&vertex.digest) {
                self.order.push(vertex.digest.clone());
            }
            if vertex.completed.is_some() && !was_done {
                completed.push(vertex.clone());
            }
            self.vertexes.insert(vertex.digest.clone(), vertex.clone());
        }
        for s in &status.statuses {
            self.statuses.insert(s.id.clone(), s.clone());
        }
        self.logs.extend(status.logs.iter().cloned());

        completed
    }

    pub fn vertex(&self, digest: &str) -> Option<&Vertex> {
        self.vertexes.get(digest)
    }

    /// 最初に観測された順の頂点
    pub fn vertexes(&self) -> impl Iterator<Item = &Vertex> {
        self.order.iter().filter_map(|d| self.vertexes.get(d))
    }

    pub fn status(&self, id: &str) -> Option<&VertexStatus> {
        self.statuses.get(id)
    }

    pub fn logs_for<'a>(&'a self, digest: &'a str) -> impl Iterator<Item = &'a VertexLog> {
        self.logs.iter().filter(move |l| l.vertex == digest)
    }

    /// 開始済みで未完了の頂点のうち、最後に観測されたもの
    pub fn running(&self) -> Option<&Vertex> {
        self.order
            .iter()
            .rev()
            .filter_map(|d| self.vertexes.get(d))
            .find(|v| v.started.is_some() && v.completed.is_none())
    }

    /// (完了数, 全体数)
    pub fn counts(&self) -> (usize, usize) {
        let done = self
            .vertexes
            .values()
            .filter(|v| v.completed.is_some())
            .count();
        (done, self.vertexes.len())
    }

    /// エラーで終わった頂点
    pub fn failed(&self) -> impl Iterator<Item = &Vertex> {
        self.vertexes().filter(|v| !v.error.is_empty())
    }
}

/// 進捗イベントの受け手
pub trait ProgressRenderer: Send {
    fn event(&mut self, event: &BuildEvent);

    /// ストリーム終了時に一度だけ呼ばれる
    fn finish(&mut self, success: bool);
}

/// 何も表示しないレンダラー
#[derive(Debug, Default)]
pub struct QuietRenderer;

impl ProgressRenderer for QuietRenderer {
    fn event(&mut self, _event: &BuildEvent) {}
    fn finish(&mut self, _success: bool) {}
}

/// スピナーと完了ステップを表示するレンダラー
pub struct ConsoleRenderer {
    progress_bar: ProgressBar,
    graph: ProgressGraph,
    image_id: Option<String>,
}

impl ConsoleRenderer {
    pub fn new(image: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb.set_message(format!("Building {}...", image));

        Self {
            progress_bar: pb,
            graph: ProgressGraph::new(),
            image_id: None,
        }
    }

    pub fn graph(&self) -> &ProgressGraph {
        &self.graph
    }

    fn on_status(&mut self, status: &SolveStatus) {
        for vertex in self.graph.apply(status) {
            let mark = if !vertex.error.is_empty() {
                "✗".red()
            } else if vertex.cached {
                "⚡".yellow()
            } else {
                "✓".green()
            };
            let elapsed = match (vertex.started, vertex.completed) {
                (Some(start), Some(end)) => {
                    format!(" {:.1}s", (end - start).num_milliseconds() as f64 / 1000.0)
                }
                _ => String::new(),
            };
            let suffix = if vertex.cached {
                " CACHED".dimmed().to_string()
            } else {
                elapsed.dimmed().to_string()
            };
            self.progress_bar
                .println(format!("  {} {}{}", mark, vertex.name, suffix));
            if !vertex.error.is_empty() {
                for log in self.graph.logs_for(&vertex.digest) {
                    self.progress_bar
                        .println(format!("    {}", log.text().trim_end().dimmed()));
                }
            }
        }

        let (done, total) = self.graph.counts();
        if let Some(running) = self.graph.running() {
            self.progress_bar
                .set_message(format!("[{}/{}] {}", done, total, running.name));
        }
    }
}

impl ProgressRenderer for ConsoleRenderer {
    fn event(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::Progress(status) => self.on_status(status),
            BuildEvent::Display(text) => {
                let text = text.trim_end();
                if !text.is_empty() {
                    self.progress_bar.set_message(text.to_string());
                }
            }
            BuildEvent::ImageId(id) => self.image_id = Some(id.clone()),
        }
    }

    fn finish(&mut self, success: bool) {
        if success {
            let msg = match &self.image_id {
                Some(id) => format!("Build completed ✓ {}", id.dimmed()),
                None => "Build completed ✓".to_string(),
            };
            self.progress_bar.finish_with_message(msg);
        } else {
            self.progress_bar
                .abandon_with_message(format!("{}", "Build failed".red()));
        }
    }
}

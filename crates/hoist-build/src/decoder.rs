//! ビルド応答のデコード
//!
//! エンジンはビルド要求に改行区切りの JSON メッセージで応答する。
//! [`TRACE_ID`] の付いたメッセージは `aux` に BuildKit の solve status を持つ
//! （JSON オブジェクト、またはその base64 文字列）。それ以外は表示用のテキスト。

use crate::error::{BuildError, Result};
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

/// solve status を運ぶメッセージの `id`
pub const TRACE_ID: &str = "moby.buildkit.trace";

const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// ビルド応答の1行
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        rename = "errorDetail",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_detail: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

/// ビルドグラフのノード
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub digest: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub cached: bool,
}

/// vertex 内の1つの処理の進捗
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexStatus {
    pub id: String,
    pub vertex: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub current: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

/// vertex の出力（`stream` 1 = stdout, 2 = stderr）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVertexLog", into = "RawVertexLog")]
pub struct VertexLog {
    pub vertex: String,
    pub stream: i64,
    pub data: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl VertexLog {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

// `data` は base64、`msg` はプレーンテキスト
#[derive(Clone, Serialize, Deserialize)]
struct RawVertexLog {
    vertex: String,
    #[serde(default)]
    stream: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<RawVertexLog> for VertexLog {
    type Error = String;

    fn try_from(raw: RawVertexLog) -> std::result::Result<Self, Self::Error> {
        let data = match (raw.data, raw.msg) {
            (Some(encoded), _) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| format!("invalid log data: {}", e))?,
            (None, Some(msg)) => msg.into_bytes(),
            (None, None) => Vec::new(),
        };
        Ok(Self {
            vertex: raw.vertex,
            stream: raw.stream,
            data,
            timestamp: raw.timestamp,
        })
    }
}

impl From<VertexLog> for RawVertexLog {
    fn from(log: VertexLog) -> Self {
        Self {
            vertex: log.vertex,
            stream: log.stream,
            data: Some(base64::engine::general_purpose::STANDARD.encode(&log.data)),
            msg: None,
            timestamp: log.timestamp,
        }
    }
}

/// デコード済みの solve status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveStatus {
    #[serde(default, alias = "vertices")]
    pub vertexes: Vec<Vertex>,
    #[serde(default)]
    pub statuses: Vec<VertexStatus>,
    #[serde(default)]
    pub logs: Vec<VertexLog>,
}

impl SolveStatus {
    pub fn is_empty(&self) -> bool {
        self.vertexes.is_empty() && self.statuses.is_empty() && self.logs.is_empty()
    }
}

/// ビルド応答をデコードした単位
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Progress(SolveStatus),
    Display(String),
    ImageId(String),
}

/// 応答の1行をデコードする
///
/// 表示するものが無い行は `Ok(None)`。応答中のビルドエラーは
/// [`BuildError::BuildFailed`] になる。
pub fn decode_line(line: &str) -> Result<Option<BuildEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let message: JsonMessage = serde_json::from_str(line)
        .map_err(|e| BuildError::Decode(format!("{}: {}", e, truncate(line))))?;

    if let Some(detail) = &message.error_detail
        && let Some(msg) = &detail.message
    {
        return Err(BuildError::BuildFailed(msg.clone()));
    }
    if let Some(error) = message.error {
        return Err(BuildError::BuildFailed(error));
    }

    if message.id.as_deref() == Some(TRACE_ID) {
        let Some(aux) = message.aux else {
            return Ok(None);
        };
        return decode_trace(aux).map(|status| Some(BuildEvent::Progress(status)));
    }

    if let Some(aux) = &message.aux
        && let Some(id) = aux.get("ID").and_then(Value::as_str)
    {
        return Ok(Some(BuildEvent::ImageId(id.to_string())));
    }

    if let Some(text) = message.stream.filter(|s| !s.is_empty()) {
        return Ok(Some(BuildEvent::Display(text)));
    }
    if let Some(status) = message.status {
        let text = match message.progress {
            Some(progress) if !progress.is_empty() => format!("{} {}", status, progress),
            _ => status,
        };
        return Ok(Some(BuildEvent::Display(text)));
    }
    Ok(None)
}

fn decode_trace(aux: Value) -> Result<SolveStatus> {
    match aux {
        Value::String(encoded) => {
            let raw = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| BuildError::Decode(format!("invalid trace payload: {}", e)))?;
            serde_json::from_slice(&raw)
                .map_err(|e| BuildError::Decode(format!("invalid solve status: {}", e)))
        }
        value @ Value::Object(_) => serde_json::from_value(value)
            .map_err(|e| BuildError::Decode(format!("invalid solve status: {}", e))),
        other => Err(BuildError::Decode(format!(
            "unexpected trace payload: {}",
            truncate(&other.to_string())
        ))),
    }
}

fn truncate(s: &str) -> &str {
    const LIMIT: usize = 200;
    match s.char_indices().nth(LIMIT) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// 応答ボディを順序どおりにビルドイベントへ変換する
///
/// ボディの転送エラーはそのまま返す。
pub fn decode_stream<S>(body: S) -> impl Stream<Item = Result<BuildEvent>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + Unpin,
{
    let reader = StreamReader::new(body.map(|chunk| chunk.map_err(std::io::Error::other)));
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).filter_map(
        |line| async move {
            match line {
                Ok(line) => decode_line(&line).transpose(),
                Err(e) => Some(Err(from_codec_error(e))),
            }
        },
    )
}

fn from_codec_error(err: LinesCodecError) -> BuildError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            BuildError::Decode("build output line too long".to_string())
        }
        LinesCodecError::Io(io) => {
            if io.get_ref().is_some_and(|inner| inner.is::<BuildError>()) {
                match io.into_inner().map(|inner| inner.downcast::<BuildError>()) {
                    Some(Ok(original)) => *original,
                    Some(Err(other)) => BuildError::Transport(other.to_string()),
                    None => BuildError::Transport("unknown transport error".to_string()),
                }
            } else {
                BuildError::Transport(io.to_string())
            }
        }
    }
}

/// メッセージを応答の1行にエンコードする（エンジンのアダプタ用）
pub fn encode_line(message: &JsonMessage) -> Result<Bytes> {
    let mut line =
        serde_json::to_vec(message).map_err(|e| BuildError::Decode(e.to_string()))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// `status` を包んだトレースメッセージ
pub fn trace_message(status: &SolveStatus) -> Result<JsonMessage> {
    let aux = serde_json::to_value(status).map_err(|e| BuildError::Decode(e.to_string()))?;
    Ok(JsonMessage {
        id: Some(TRACE_ID.to_string()),
        aux: Some(aux),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const TRACE_LINE: &str = r#"{"id":"moby.buildkit.trace","aux":{"vertexes":[{"digest":"sha256:aaa","inputs":[],"name":"[1/2] FROM docker.io/library/alpine","started":"2024-05-01T10:00:00Z","cached":true}],"statuses":[{"id":"resolve","vertex":"sha256:aaa","name":"resolve","total":10,"current":4}],"logs":[{"vertex":"sha256:aaa","stream":1,"data":"aGVsbG8K"}]}}"#;

    #[test]
    fn test_decode_trace_object() {
        let event = decode_line(TRACE_LINE).unwrap().unwrap();
        let BuildEvent::Progress(status) = event else {
            panic!("expected progress");
        };
        assert_eq!(status.vertexes.len(), 1);
        assert!(status.vertexes[0].cached);
        assert!(status.vertexes[0].started.is_some());
        assert!(status.vertexes[0].completed.is_none());
        assert_eq!(status.statuses[0].current, 4);
        assert_eq!(status.logs[0].text(), "hello\n");
    }

    #[test]
    fn test_decode_trace_base64_with_vertices_alias() {
        let payload = r#"{"vertices":[{"digest":"sha256:bbb","name":"RUN make"}],"logs":[{"vertex":"sha256:bbb","stream":2,"msg":"warning"}]}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
        let line = format!(r#"{{"id":"{}","aux":"{}"}}"#, TRACE_ID, encoded);

        let Some(BuildEvent::Progress(status)) = decode_line(&line).unwrap() else {
            panic!("expected progress");
        };
        assert_eq!(status.vertexes[0].name, "RUN make");
        assert_eq!(status.logs[0].stream, 2);
        assert_eq!(status.logs[0].text(), "warning");
    }

    #[test]
    fn test_display_and_image_id() {
        assert_eq!(
            decode_line(r#"{"stream":"Step 1/2 : FROM alpine\n"}"#).unwrap(),
            Some(BuildEvent::Display("Step 1/2 : FROM alpine\n".into()))
        );
        assert_eq!(
            decode_line(r#"{"status":"Downloading","progress":"[==>  ]"}"#).unwrap(),
            Some(BuildEvent::Display("Downloading [==>  ]".into()))
        );
        assert_eq!(
            decode_line(r#"{"aux":{"ID":"sha256:abc"}}"#).unwrap(),
            Some(BuildEvent::ImageId("sha256:abc".into()))
        );
        assert_eq!(decode_line("   ").unwrap(), None);
        assert_eq!(decode_line(r#"{"id":"moby.buildkit.trace"}"#).unwrap(), None);
    }

    #[test]
    fn test_inline_error_is_build_failure() {
        let err = decode_line(
            r#"{"errorDetail":{"message":"process \"/bin/sh -c false\" did not complete"},"error":"x"}"#,
        )
        .unwrap_err();
        match err {
            BuildError::BuildFailed(msg) => assert!(msg.contains("did not complete")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            decode_line(r#"{"error":"boom"}"#).unwrap_err(),
            BuildError::BuildFailed(_)
        ));
    }

    #[test]
    fn test_malformed_line_is_decode_error() {
        assert!(matches!(
            decode_line("{not json").unwrap_err(),
            BuildError::Decode(_)
        ));
        assert!(matches!(
            decode_line(r#"{"id":"moby.buildkit.trace","aux":42}"#).unwrap_err(),
            BuildError::Decode(_)
        ));
    }

    #[test]
    fn test_trace_message_round_trip() {
        let status = SolveStatus {
            logs: vec![VertexLog {
                vertex: "sha256:ccc".into(),
                stream: 1,
                data: b"\x00binary\xff".to_vec(),
                timestamp: None,
            }],
            ..Default::default()
        };
        let line = encode_line(&trace_message(&status).unwrap()).unwrap();
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(
            decode_line(text).unwrap(),
            Some(BuildEvent::Progress(status))
        );
    }

    #[tokio::test]
    async fn test_decode_stream_splits_chunks_in_order() {
        // チャンクをまたぐ行と、1チャンクに2行
        let body = format!("{}\n{{\"stream\":\"one\"}}\n{{\"stream\":\"two\"}}\n", TRACE_LINE);
        let (a, b) = body.split_at(37);
        let chunks = vec![
            Ok(Bytes::copy_from_slice(a.as_bytes())),
            Ok(Bytes::copy_from_slice(b.as_bytes())),
        ];

        let events: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Ok(BuildEvent::Progress(_))));
        assert_eq!(events[1].as_ref().unwrap(), &BuildEvent::Display("one".into()));
        assert_eq!(events[2].as_ref().unwrap(), &BuildEvent::Display("two".into()));
    }

    #[tokio::test]
    async fn test_decode_stream_passes_transport_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"{\"stream\":\"one\"}\n")),
            Err(BuildError::Transport("connection reset".into())),
        ];
        let events: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(BuildError::Transport(ref m)) if m == "connection reset"));
    }
}

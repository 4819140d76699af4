use std::pin::Pin;

use futures::{future, stream, Stream, StreamExt};
use serde_json::json;
use tracing::warn;

use crate::error::ProviderError;
use crate::types::{StreamChunk, ToolUse};

/// A provider's decoded output: typed chunks until `MessageStop` or a
/// terminal error. Chunks emitted before an error remain valid.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Decode an SSE byte stream into typed chunks. Each event is a
/// `data: {json}` line carrying the chunk vocabulary; `data: [DONE]` is
/// accepted as a stop marker. SSE lines can be split across TCP chunks,
/// so a remainder buffer is carried forward and only complete lines
/// (terminated by '\n') are parsed.
pub fn decode_sse<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let chunks = bytes
        .scan(String::new(), |buf, item| {
            let text = match item {
                Ok(b) => String::from_utf8_lossy(b.as_ref()).to_string(),
                Err(e) => {
                    return future::ready(Some(vec![Err(ProviderError::Transport(
                        e.to_string(),
                    ))]));
                }
            };
            buf.push_str(&text);
            let mut out = Vec::new();
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                if let Some(data) = line.strip_prefix("data: ") {
                    let data = data.trim();
                    if data == "[DONE]" {
                        out.push(Ok(StreamChunk::MessageStop));
                    } else {
                        out.push(parse_chunk(data));
                    }
                }
            }
            future::ready(Some(out))
        })
        .flat_map(stream::iter);
    Box::pin(chunks)
}

/// Parse one SSE data payload into a chunk.
pub fn parse_chunk(data: &str) -> Result<StreamChunk, ProviderError> {
    serde_json::from_str(data).map_err(|e| ProviderError::Decode(format!("bad chunk: {e}")))
}

/// What the processor hands the agent loop per chunk.
#[derive(Debug, Clone)]
pub enum StreamOutput {
    /// A non-empty text delta.
    Text(String),
    /// A tool call whose argument fragments have all arrived.
    ToolComplete(ToolUse),
    /// Terminal marker for the message.
    Stop,
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    arguments: String,
}

/// Folds a chunk sequence into loop-ready outputs: text deltas pass
/// through, partial tool-call argument fragments accumulate per call id,
/// and a single complete [`ToolUse`] is yielded per `ToolUseEnd`.
#[derive(Debug, Default)]
pub struct StreamProcessor {
    pending: Vec<PendingToolUse>,
}

impl StreamProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: StreamChunk) -> Option<StreamOutput> {
        match chunk {
            StreamChunk::TextDelta { text } => {
                (!text.is_empty()).then_some(StreamOutput::Text(text))
            }
            StreamChunk::ToolUseStart { id, name } => {
                self.pending.push(PendingToolUse {
                    id,
                    name,
                    arguments: String::new(),
                });
                None
            }
            StreamChunk::ToolUseDelta { id, partial } => {
                match self.pending.iter_mut().find(|p| p.id == id) {
                    Some(pending) => pending.arguments.push_str(&partial),
                    None => warn!(%id, "tool_use_delta for unknown call id, ignoring"),
                }
                None
            }
            StreamChunk::ToolUseEnd { id } => {
                let Some(pos) = self.pending.iter().position(|p| p.id == id) else {
                    warn!(%id, "tool_use_end for unknown call id, ignoring");
                    return None;
                };
                let pending = self.pending.remove(pos);
                let arguments = if pending.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&pending.arguments).unwrap_or_else(|e| {
                        warn!(
                            id = %pending.id,
                            name = %pending.name,
                            error = %e,
                            "tool arguments did not parse as JSON, substituting empty map"
                        );
                        json!({})
                    })
                };
                Some(StreamOutput::ToolComplete(ToolUse {
                    id: pending.id,
                    name: pending.name,
                    arguments,
                }))
            }
            StreamChunk::MessageStop => Some(StreamOutput::Stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn ok_bytes(parts: Vec<&str>) -> impl Stream<Item = Result<Vec<u8>, Infallible>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(p.as_bytes().to_vec()))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn decodes_complete_lines() {
        let input = ok_bytes(vec![
            "data: {\"type\":\"text_delta\",\"text\":\"hel\"}\n",
            "data: {\"type\":\"text_delta\",\"text\":\"lo\"}\ndata: {\"type\":\"message_stop\"}\n",
        ]);
        let chunks: Vec<_> = decode_sse(input).collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0].as_ref().unwrap(),
            &StreamChunk::TextDelta { text: "hel".into() }
        );
        assert_eq!(chunks[2].as_ref().unwrap(), &StreamChunk::MessageStop);
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let input = ok_bytes(vec![
            "data: {\"type\":\"text_de",
            "lta\",\"text\":\"hi\"}\n",
        ]);
        let chunks: Vec<_> = decode_sse(input).collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].as_ref().unwrap(),
            &StreamChunk::TextDelta { text: "hi".into() }
        );
    }

    #[tokio::test]
    async fn done_marker_is_message_stop() {
        let input = ok_bytes(vec!["data: [DONE]\n"]);
        let chunks: Vec<_> = decode_sse(input).collect().await;
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::MessageStop);
    }

    #[tokio::test]
    async fn non_data_lines_are_ignored() {
        let input = ok_bytes(vec![
            "event: ping\n: comment\n\ndata: {\"type\":\"message_stop\"}\n",
        ]);
        let chunks: Vec<_> = decode_sse(input).collect().await;
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn bad_json_yields_decode_error_after_valid_chunks() {
        let input = ok_bytes(vec![
            "data: {\"type\":\"text_delta\",\"text\":\"ok\"}\ndata: {not json}\n",
        ]);
        let chunks: Vec<_> = decode_sse(input).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(chunks[1], Err(ProviderError::Decode(_))));
    }

    #[test]
    fn accumulates_tool_arguments_across_deltas() {
        let mut proc = StreamProcessor::new();
        assert!(proc
            .process(StreamChunk::ToolUseStart {
                id: "t1".into(),
                name: "clock/now".into(),
            })
            .is_none());
        assert!(proc
            .process(StreamChunk::ToolUseDelta {
                id: "t1".into(),
                partial: "{\"zone\":".into(),
            })
            .is_none());
        assert!(proc
            .process(StreamChunk::ToolUseDelta {
                id: "t1".into(),
                partial: "\"utc\"}".into(),
            })
            .is_none());
        let out = proc.process(StreamChunk::ToolUseEnd { id: "t1".into() });
        let Some(StreamOutput::ToolComplete(tool_use)) = out else {
            panic!("expected complete tool use, got {out:?}");
        };
        assert_eq!(tool_use.name, "clock/now");
        assert_eq!(tool_use.arguments["zone"], "utc");
    }

    #[test]
    fn empty_arguments_become_empty_map() {
        let mut proc = StreamProcessor::new();
        proc.process(StreamChunk::ToolUseStart {
            id: "t1".into(),
            name: "clock/now".into(),
        });
        let out = proc.process(StreamChunk::ToolUseEnd { id: "t1".into() });
        let Some(StreamOutput::ToolComplete(tool_use)) = out else {
            panic!("expected complete tool use");
        };
        assert_eq!(tool_use.arguments, json!({}));
    }

    #[test]
    fn interleaved_tool_calls_keep_their_fragments() {
        let mut proc = StreamProcessor::new();
        proc.process(StreamChunk::ToolUseStart {
            id: "a".into(),
            name: "first".into(),
        });
        proc.process(StreamChunk::ToolUseStart {
            id: "b".into(),
            name: "second".into(),
        });
        proc.process(StreamChunk::ToolUseDelta {
            id: "b".into(),
            partial: "{\"n\":2}".into(),
        });
        proc.process(StreamChunk::ToolUseDelta {
            id: "a".into(),
            partial: "{\"n\":1}".into(),
        });
        let Some(StreamOutput::ToolComplete(a)) =
            proc.process(StreamChunk::ToolUseEnd { id: "a".into() })
        else {
            panic!("expected tool a");
        };
        let Some(StreamOutput::ToolComplete(b)) =
            proc.process(StreamChunk::ToolUseEnd { id: "b".into() })
        else {
            panic!("expected tool b");
        };
        assert_eq!(a.arguments["n"], 1);
        assert_eq!(b.arguments["n"], 2);
    }

    #[test]
    fn empty_text_delta_produces_no_output() {
        let mut proc = StreamProcessor::new();
        assert!(proc
            .process(StreamChunk::TextDelta { text: String::new() })
            .is_none());
    }

    #[test]
    fn unknown_end_is_ignored() {
        let mut proc = StreamProcessor::new();
        assert!(proc
            .process(StreamChunk::ToolUseEnd { id: "ghost".into() })
            .is_none());
    }
}

//! Incremental decoding of streamed generation responses.
//!
//! Both supported backends stream line-delimited payloads:
//! - Ollama: NDJSON, one `{"response": "...", "done": bool}` object per line
//! - OpenAI-compatible: SSE, `data: {...}` lines terminated by `data: [DONE]`
//!
//! [`line_stream`] turns a `reqwest::Response` into a [`FragmentStream`] of
//! text fragments using a per-provider line parser. Dropping the stream drops
//! the response body, which closes the connection and stops generation upstream.

use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;

use crate::error_handler::{AiLlmError, Provider, ProviderError, ProviderErrorKind};

/// Stream of generated text fragments, in arrival order.
pub type FragmentStream = BoxStream<'static, Result<String, AiLlmError>>;

/// Outcome of parsing one line of a streamed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Text to forward to the caller.
    Fragment(String),
    /// Keep-alive, comment, metadata or an empty delta.
    Skip,
    /// Backend signalled the end of generation.
    Done,
}

type LineParser = fn(&str) -> Result<LineEvent, ProviderErrorKind>;

struct LineState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: Vec<u8>,
    provider: Provider,
    parse: LineParser,
    eof: bool,
    finished: bool,
}

/// Builds a fragment stream over a successful streaming response.
pub(crate) fn line_stream(
    resp: reqwest::Response,
    provider: Provider,
    parse: LineParser,
) -> FragmentStream {
    let state = LineState {
        body: resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
        buf: Vec::new(),
        provider,
        parse,
        eof: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                match (st.parse)(line.trim_end_matches(['\r', '\n'])) {
                    Ok(LineEvent::Fragment(s)) => return Some((Ok(s), st)),
                    Ok(LineEvent::Skip) => continue,
                    Ok(LineEvent::Done) => {
                        st.finished = true;
                        return None;
                    }
                    Err(kind) => {
                        st.finished = true;
                        let err = AiLlmError::from(ProviderError::new(st.provider, kind));
                        return Some((Err(err), st));
                    }
                }
            }

            if st.eof {
                if st.buf.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                // Unterminated last line.
                st.buf.push(b'\n');
                continue;
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(AiLlmError::from(e)), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}

/* ---------------------------------------------------------------------- */
/* Ollama NDJSON                                                          */
/* ---------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Parses one NDJSON line from `POST /api/generate` with `stream=true`.
pub fn parse_ollama_line(line: &str) -> Result<LineEvent, ProviderErrorKind> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let chunk: OllamaChunk = serde_json::from_str(line)
        .map_err(|e| ProviderErrorKind::Decode(format!("ndjson chunk: {e}")))?;
    if let Some(err) = chunk.error {
        return Err(ProviderErrorKind::Decode(format!("upstream error: {err}")));
    }
    match (chunk.response.is_empty(), chunk.done) {
        (true, true) => Ok(LineEvent::Done),
        (true, false) => Ok(LineEvent::Skip),
        (false, _) => Ok(LineEvent::Fragment(chunk.response)),
    }
}

/* ---------------------------------------------------------------------- */
/* OpenAI SSE                                                             */
/* ---------------------------------------------------------------------- */

#[derive(Debug, Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: SseDelta,
}

#[derive(Debug, Default, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parses one SSE line from `POST /v1/chat/completions` with `stream=true`.
pub fn parse_openai_sse_line(line: &str) -> Result<LineEvent, ProviderErrorKind> {
    let Some(data) = line.strip_prefix("data:") else {
        // `event:`, `id:`, comments and blank separators.
        return Ok(LineEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(LineEvent::Done);
    }
    if data.is_empty() {
        return Ok(LineEvent::Skip);
    }
    let chunk: SseChunk = serde_json::from_str(data)
        .map_err(|e| ProviderErrorKind::Decode(format!("sse chunk: {e}")))?;
    let text = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect::<String>();
    if text.is_empty() {
        Ok(LineEvent::Skip)
    } else {
        Ok(LineEvent::Fragment(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_lines() {
        assert_eq!(
            parse_ollama_line(r#"{"response":"Hel","done":false}"#).unwrap(),
            LineEvent::Fragment("Hel".into())
        );
        assert_eq!(
            parse_ollama_line(r#"{"response":"","done":true,"eval_count":12}"#).unwrap(),
            LineEvent::Done
        );
        assert_eq!(parse_ollama_line("   ").unwrap(), LineEvent::Skip);
        assert!(parse_ollama_line(r#"{"error":"model not found"}"#).is_err());
        assert!(parse_ollama_line("{not json").is_err());
    }

    #[test]
    fn openai_sse_lines() {
        let line = r#"data: {"choices":[{"delta":{"content":"[Evidence #1]"}}]}"#;
        assert_eq!(
            parse_openai_sse_line(line).unwrap(),
            LineEvent::Fragment("[Evidence #1]".into())
        );
        assert_eq!(parse_openai_sse_line("data: [DONE]").unwrap(), LineEvent::Done);
        assert_eq!(parse_openai_sse_line(": keep-alive").unwrap(), LineEvent::Skip);
        assert_eq!(
            parse_openai_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
                .unwrap(),
            LineEvent::Skip
        );
    }
}

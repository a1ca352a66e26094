//! Turns a raw completion byte stream into the frames relayed to SSE clients.
//!
//! Every upstream chunk becomes one `Data` frame, untouched apart from UTF-8
//! decoding. A clean end of stream yields a single `End`; an upstream error
//! yields a single `Error` and nothing after it.
//!
//! The one exception to "one frame per chunk": a chunk made up entirely of
//! the leading bytes of a multi-byte character produces no frame of its own.
//! Those bytes are held back and sent at the front of the frame for the
//! chunk that completes the character.

use crate::traits::CompletionStream;
use futures::{Stream, StreamExt};

pub const END_EVENT: &str = "end";
pub const ERROR_EVENT: &str = "error";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Data(String),
    End,
    Error(String),
}

/// Holds back a trailing partial UTF-8 sequence until the next chunk completes it.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(error) if error.error_len().is_none() => {
                let valid = error.valid_up_to();
                let tail = self.pending.split_off(valid);
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending = tail;
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

enum RelayState {
    Streaming(CompletionStream, Utf8Carry),
    Ending,
    Done,
}

pub fn relay_frames(upstream: CompletionStream) -> impl Stream<Item = RelayFrame> + Send {
    futures::stream::unfold(
        RelayState::Streaming(upstream, Utf8Carry::default()),
        |state| async move {
            match state {
                RelayState::Streaming(mut upstream, mut carry) => loop {
                    match upstream.next().await {
                        Some(Ok(bytes)) => {
                            let text = carry.push(&bytes);
                            if text.is_empty() {
                                continue;
                            }
                            return Some((
                                RelayFrame::Data(text),
                                RelayState::Streaming(upstream, carry),
                            ));
                        }
                        Some(Err(error)) => {
                            return Some((RelayFrame::Error(error.to_string()), RelayState::Done));
                        }
                        None => {
                            return match carry.finish() {
                                Some(rest) => Some((RelayFrame::Data(rest), RelayState::Ending)),
                                None => Some((RelayFrame::End, RelayState::Done)),
                            };
                        }
                    }
                },
                RelayState::Ending => Some((RelayFrame::End, RelayState::Done)),
                RelayState::Done => None,
            }
        },
    )
}

/// A stream that reports a failure which happened before any upstream bytes arrived.
pub fn error_frames(message: String) -> impl Stream<Item = RelayFrame> + Send {
    futures::stream::once(async move { RelayFrame::Error(message) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompletionError;
    use bytes::Bytes;

    fn chunk(bytes: &'static [u8]) -> Result<Bytes, CompletionError> {
        Ok(Bytes::from_static(bytes))
    }

    fn upstream(items: Vec<Result<Bytes, CompletionError>>) -> CompletionStream {
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn three_chunks_then_end() {
        let frames: Vec<RelayFrame> = relay_frames(upstream(vec![
            chunk(b"data: {\"a\":1}\n\n"),
            chunk(b"data: {\"a\":2}\n\n"),
            chunk(b"data: [DONE]\n\n"),
        ]))
        .collect()
        .await;

        assert_eq!(
            frames,
            vec![
                RelayFrame::Data("data: {\"a\":1}\n\n".to_string()),
                RelayFrame::Data("data: {\"a\":2}\n\n".to_string()),
                RelayFrame::Data("data: [DONE]\n\n".to_string()),
                RelayFrame::End,
            ]
        );
    }

    #[tokio::test]
    async fn upstream_error_ends_with_single_error_frame() {
        let frames: Vec<RelayFrame> = relay_frames(upstream(vec![
            chunk(b"partial"),
            Err(CompletionError::MissingContent),
            chunk(b"never relayed"),
        ]))
        .collect()
        .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], RelayFrame::Data("partial".to_string()));
        assert!(matches!(frames[1], RelayFrame::Error(_)));
    }

    #[tokio::test]
    async fn split_multibyte_characters_are_rejoined() {
        let frames: Vec<RelayFrame> = relay_frames(upstream(vec![
            chunk(b"caf\xC3"),
            chunk(b"\xA9!"),
        ]))
        .collect()
        .await;

        assert_eq!(
            frames,
            vec![
                RelayFrame::Data("caf".to_string()),
                RelayFrame::Data("é!".to_string()),
                RelayFrame::End,
            ]
        );
    }

    #[tokio::test]
    async fn chunk_holding_only_a_partial_character_is_merged_forward() {
        let frames: Vec<RelayFrame> = relay_frames(upstream(vec![
            chunk(b"\xE2\x9C"),
            chunk(b"\x93"),
            chunk(b"x"),
        ]))
        .collect()
        .await;

        assert_eq!(
            frames,
            vec![
                RelayFrame::Data("✓".to_string()),
                RelayFrame::Data("x".to_string()),
                RelayFrame::End,
            ]
        );
    }

    #[tokio::test]
    async fn dangling_partial_character_is_flushed_before_end() {
        let frames: Vec<RelayFrame> = relay_frames(upstream(vec![chunk(b"ok"), chunk(b"\xE2\x9C")]))
            .collect()
            .await;

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], RelayFrame::Data("ok".to_string()));
        assert!(matches!(frames[1], RelayFrame::Data(ref text) if text.contains('\u{FFFD}')));
        assert_eq!(frames[2], RelayFrame::End);
    }

    #[tokio::test]
    async fn empty_upstream_only_ends() {
        let frames: Vec<RelayFrame> = relay_frames(upstream(Vec::new())).collect().await;
        assert_eq!(frames, vec![RelayFrame::End]);
    }
}

//! Event normalizer — turns the raw LLM delta stream into canonical
//! events, splitting inline `<think>…</think>` segments out of the text.
//!
//! The splitter is the only stateful part and lives for exactly one LLM
//! call; a tag may be split across any number of raw frames, so a suffix
//! that could still become a tag is held back until the next chunk
//! decides it.

use parley_domain::event::CanonicalEvent;
use uuid::Uuid;

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagState {
    Outside,
    InsideThink,
}

/// Incremental `<think>` tag splitter.
///
/// Feeding chunks yields canonical content/thinking events in receipt
/// order; [`ThinkSplitter::finish`] flushes whatever is still buffered at
/// end of stream (an unterminated think block is closed).
pub struct ThinkSplitter {
    state: TagState,
    carry: String,
    thinking_id: Option<String>,
}

impl Default for ThinkSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self {
            state: TagState::Outside,
            carry: String::new(),
            thinking_id: None,
        }
    }

    /// Feed one raw delta; returns the canonical events it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<CanonicalEvent> {
        self.carry.push_str(chunk);
        let mut events = Vec::new();

        loop {
            match self.state {
                TagState::Outside => {
                    if let Some(pos) = self.carry.find(OPEN_TAG) {
                        let before = &self.carry[..pos];
                        if !before.is_empty() {
                            events.push(CanonicalEvent::ContentDelta {
                                delta: before.to_string(),
                            });
                        }
                        self.carry.drain(..pos + OPEN_TAG.len());
                        let id = Uuid::new_v4().to_string();
                        events.push(CanonicalEvent::ThinkingBegin {
                            thinking_id: id.clone(),
                        });
                        self.thinking_id = Some(id);
                        self.state = TagState::InsideThink;
                    } else {
                        let hold = partial_tag_suffix(&self.carry, OPEN_TAG);
                        let emit_to = self.carry.len() - hold;
                        if emit_to > 0 {
                            let delta: String = self.carry.drain(..emit_to).collect();
                            events.push(CanonicalEvent::ContentDelta { delta });
                        }
                        break;
                    }
                }
                TagState::InsideThink => {
                    let id = self
                        .thinking_id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    if let Some(pos) = self.carry.find(CLOSE_TAG) {
                        let inside = &self.carry[..pos];
                        if !inside.is_empty() {
                            events.push(CanonicalEvent::ThinkingDelta {
                                thinking_id: id.clone(),
                                delta: inside.to_string(),
                            });
                        }
                        self.carry.drain(..pos + CLOSE_TAG.len());
                        events.push(CanonicalEvent::ThinkingEnd { thinking_id: id });
                        self.thinking_id = None;
                        self.state = TagState::Outside;
                    } else {
                        let hold = partial_tag_suffix(&self.carry, CLOSE_TAG);
                        let emit_to = self.carry.len() - hold;
                        if emit_to > 0 {
                            let delta: String = self.carry.drain(..emit_to).collect();
                            events.push(CanonicalEvent::ThinkingDelta {
                                thinking_id: id,
                                delta,
                            });
                        }
                        break;
                    }
                }
            }
        }

        events
    }

    /// Flush at end of stream. An unterminated think block is closed; a
    /// held-back partial tag is emitted literally.
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        let mut events = Vec::new();
        let rest: String = std::mem::take(&mut self.carry);

        match self.state {
            TagState::Outside => {
                if !rest.is_empty() {
                    events.push(CanonicalEvent::ContentDelta { delta: rest });
                }
            }
            TagState::InsideThink => {
                let id = self
                    .thinking_id
                    .take()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                if !rest.is_empty() {
                    events.push(CanonicalEvent::ThinkingDelta {
                        thinking_id: id.clone(),
                        delta: rest,
                    });
                }
                events.push(CanonicalEvent::ThinkingEnd { thinking_id: id });
                self.state = TagState::Outside;
            }
        }

        events
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of `tag`.
///
/// That suffix might still grow into the tag once more bytes arrive, so
/// it must not be emitted yet.
fn partial_tag_suffix(s: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(s.len());
    for take in (1..=max).rev() {
        if !s.is_char_boundary(s.len() - take) {
            continue;
        }
        if tag.starts_with(&s[s.len() - take..]) {
            return take;
        }
    }
    0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

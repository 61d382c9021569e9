use std::collections::HashSet;

use parley_core::messages::{CallIdentity, Media, ToolCall};
use parley_core::stream::Chunk;
use parley_core::tokens::TokenUsage;

/// Merge a streamed fragment into `acc`.
///
/// A fragment already contained as a prefix of `acc` is a replay and changes
/// nothing; a fragment that extends `acc` replaces it; anything else is a
/// fresh delta and is appended. Returns whether `acc` changed.
pub fn merge_by_prefix(acc: &mut String, incoming: &str) -> bool {
    if incoming.is_empty() || acc.starts_with(incoming) {
        return false;
    }
    if incoming.starts_with(acc.as_str()) {
        acc.clear();
    }
    acc.push_str(incoming);
    true
}

/// Join two text blocks with a blank line when both are non-empty.
pub fn join_blocks(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head}\n\n{tail}"),
    }
}

/// Ordered, value-deduplicated collection; first occurrence wins.
#[derive(Debug)]
pub struct DedupList<T> {
    items: Vec<T>,
    seen: HashSet<String>,
}

impl<T> Default for DedupList<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

impl<T> DedupList<T> {
    /// Insert `item` under `key`. Returns false for a repeat.
    pub fn insert(&mut self, key: String, item: T) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What one chunk contributed to the round.
#[derive(Debug, Default)]
pub struct ChunkEffect {
    pub new_calls: Vec<ToolCall>,
    pub new_media: Vec<Media>,
}

/// Accumulation for a single backend round.
///
/// Text and thought are merged by prefix; tool calls are kept once per
/// identity within the round; the usage snapshot is the latest seen.
#[derive(Debug, Default)]
pub struct RoundAccumulator {
    text: String,
    thought: String,
    call_keys: HashSet<CallIdentity>,
    calls: Vec<ToolCall>,
    text_before_tools: bool,
    usage: Option<TokenUsage>,
}

impl RoundAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a chunk in. Signatures and media are reported back so the caller
    /// can de-duplicate them across the whole Turn.
    pub fn apply(
        &mut self,
        chunk: &Chunk,
        signatures: &mut DedupList<String>,
        media: &mut DedupList<Media>,
    ) -> ChunkEffect {
        let mut effect = ChunkEffect::default();

        merge_by_prefix(&mut self.text, &chunk.visible_text());
        merge_by_prefix(&mut self.thought, &chunk.thought_text());

        for sig in chunk.signatures() {
            signatures.insert(sig.to_string(), sig.to_string());
        }

        for item in chunk.visible_media() {
            if media.insert(item.dedup_key(), item.clone()) {
                effect.new_media.push(item.clone());
            }
        }

        for call in chunk.tool_calls() {
            // Backends re-emit identical call fragments across chunk boundaries.
            if !self.call_keys.insert(call.identity()) {
                continue;
            }
            if self.calls.is_empty() {
                self.text_before_tools = !self.text.is_empty();
            }
            self.calls.push(call.clone());
            effect.new_calls.push(call.clone());
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        effect
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn thought(&self) -> &str {
        &self.thought
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    pub fn text_before_tools(&self) -> bool {
        self.text_before_tools
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }
}

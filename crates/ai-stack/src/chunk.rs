//! Text emission strategies.
//!
//! A [`ChunkStrategy`] decides, for each incoming text delta, whether the
//! accumulated text should be surfaced to the consumer now or held back
//! until a later delta. Strategies never touch the accumulated text; the
//! only state they may keep is an internal counter.
//!
//! | Strategy | Emits when |
//! |----------|------------|
//! | [`ImmediateStrategy`] | always |
//! | [`PunctuationStrategy`] | the delta contains `. , ! ? ; :` or a newline |
//! | [`WordBoundaryStrategy`] | the delta ends in a space, tab, or newline |
//! | [`BatchStrategy`] | every nth delta since the last reset |
//! | [`CompositeStrategy`] | any member emits |

/// Decides when accumulated text should be flushed to the consumer.
pub trait ChunkStrategy: Send {
    /// Returns `true` if the consumer should see `accumulated` now.
    fn should_emit(&mut self, delta: &str, accumulated: &str) -> bool;

    /// Clears internal state. Stateless strategies ignore this.
    fn reset(&mut self) {}
}

/// Emits on every delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateStrategy;

impl ChunkStrategy for ImmediateStrategy {
    fn should_emit(&mut self, _delta: &str, _accumulated: &str) -> bool {
        true
    }
}

/// Emits when the delta contains sentence or clause punctuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PunctuationStrategy;

const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '\n'];

impl ChunkStrategy for PunctuationStrategy {
    fn should_emit(&mut self, delta: &str, _accumulated: &str) -> bool {
        delta.contains(PUNCTUATION)
    }
}

/// Emits when the delta ends on whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordBoundaryStrategy;

impl ChunkStrategy for WordBoundaryStrategy {
    fn should_emit(&mut self, delta: &str, _accumulated: &str) -> bool {
        delta.ends_with([' ', '\t', '\n'])
    }
}

/// Emits on every `n`th call since construction or the last reset.
#[derive(Debug, Clone)]
pub struct BatchStrategy {
    size: usize,
    count: usize,
}

impl BatchStrategy {
    /// Creates a batch strategy. A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            count: 0,
        }
    }
}

impl ChunkStrategy for BatchStrategy {
    fn should_emit(&mut self, _delta: &str, _accumulated: &str) -> bool {
        self.count += 1;
        if self.count >= self.size {
            self.count = 0;
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Emits when any member strategy emits.
///
/// Every member is consulted on every delta, so stateful members keep
/// counting even when an earlier member already said yes.
#[derive(Default)]
pub struct CompositeStrategy {
    members: Vec<Box<dyn ChunkStrategy>>,
}

impl CompositeStrategy {
    /// Creates a composite over `members`.
    pub fn new(members: Vec<Box<dyn ChunkStrategy>>) -> Self {
        Self { members }
    }
}

impl std::fmt::Debug for CompositeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeStrategy")
            .field("members", &self.members.len())
            .finish()
    }
}

impl ChunkStrategy for CompositeStrategy {
    fn should_emit(&mut self, delta: &str, accumulated: &str) -> bool {
        self.members
            .iter_mut()
            .fold(false, |any, s| s.should_emit(delta, accumulated) | any)
    }

    fn reset(&mut self) {
        for member in &mut self.members {
            member.reset();
        }
    }
}

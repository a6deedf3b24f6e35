use crate::types::{IndexError, Result};

use super::token::Token;

/// Lifecycle of a [`RangeIterator`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IterState {
    /// Nothing consumed or skipped yet.
    Fresh,
    /// At least one element consumed or skipped.
    Iterating,
    /// No further elements.
    Exhausted,
    /// Released by `close()`.
    Closed,
}

/// Cursor over ascending tokens with monotonic skip-ahead.
///
/// Shared by builder and reader iterators so union/intersection evaluators can
/// consume either without knowing the source.
pub trait RangeIterator {
    /// Smallest token the iterator may yield, fixed at construction.
    fn min_token(&self) -> Option<i64>;
    /// Largest token the iterator may yield, fixed at construction.
    fn max_token(&self) -> Option<i64>;
    /// Estimated number of tokens, fixed at construction.
    fn token_count(&self) -> u64;
    /// Current lifecycle state.
    fn state(&self) -> IterState;
    /// Key of the most recently yielded token.
    fn current(&self) -> Option<i64>;
    /// Returns true when `next_token` would yield an element.
    fn has_next(&mut self) -> Result<bool>;
    /// Yields the next token. Callers must check `has_next` first; past the end
    /// this fails with [`IndexError::Exhausted`].
    fn next_token(&mut self) -> Result<Token>;
    /// Advances to the first token `>= target`. Never moves backwards; a target
    /// past `max_token()` exhausts the iterator.
    fn skip_to(&mut self, target: i64) -> Result<()>;
    /// Releases any resource held by the iterator.
    fn close(&mut self);
}

/// Producer behind a [`RangeCursor`].
///
/// Implementors only walk forward; the cursor owns the state machine, the
/// one-element lookahead and the monotonicity checks.
pub trait TokenSource {
    /// Produces the next token in ascending order, or `None` at the end.
    fn compute_next(&mut self) -> Result<Option<Token>>;
    /// Repositions so the next `compute_next` yields the first token `>= target`.
    ///
    /// Only called with targets above every token already produced.
    fn perform_skip_to(&mut self, target: i64) -> Result<()>;
    /// Drops any resource the source holds.
    fn release(&mut self) {}
}

/// [`RangeIterator`] state machine wrapped around a [`TokenSource`].
pub struct RangeCursor<S> {
    source: S,
    bounds: Option<(i64, i64)>,
    count: u64,
    state: IterState,
    peeked: Option<Token>,
    current: Option<i64>,
}

impl<S: TokenSource> RangeCursor<S> {
    /// Wraps `source`, whose tokens lie within `bounds` (inclusive).
    pub fn new(source: S, bounds: Option<(i64, i64)>, count: u64) -> Self {
        Self {
            source,
            bounds,
            count,
            state: IterState::Fresh,
            peeked: None,
            current: None,
        }
    }

    fn fill(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        match self.source.compute_next() {
            Ok(Some(token)) => {
                debug_assert!(
                    self.current.map_or(true, |cur| token.key() > cur),
                    "token source yielded out of order"
                );
                self.peeked = Some(token);
                Ok(true)
            }
            Ok(None) => {
                self.state = IterState::Exhausted;
                Ok(false)
            }
            Err(err) => {
                self.state = IterState::Exhausted;
                Err(err)
            }
        }
    }
}

impl<S: TokenSource> RangeIterator for RangeCursor<S> {
    fn min_token(&self) -> Option<i64> {
        self.bounds.map(|(min, _)| min)
    }

    fn max_token(&self) -> Option<i64> {
        self.bounds.map(|(_, max)| max)
    }

    fn token_count(&self) -> u64 {
        self.count
    }

    fn state(&self) -> IterState {
        self.state
    }

    fn current(&self) -> Option<i64> {
        self.current
    }

    fn has_next(&mut self) -> Result<bool> {
        match self.state {
            IterState::Exhausted | IterState::Closed => Ok(false),
            IterState::Fresh | IterState::Iterating => self.fill(),
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        if self.state == IterState::Closed {
            return Err(IndexError::Closed);
        }
        if !self.has_next()? {
            return Err(IndexError::Exhausted);
        }
        let token = self.peeked.take().ok_or(IndexError::Exhausted)?;
        self.current = Some(token.key());
        self.state = IterState::Iterating;
        Ok(token)
    }

    fn skip_to(&mut self, target: i64) -> Result<()> {
        if matches!(self.state, IterState::Exhausted | IterState::Closed) {
            return Ok(());
        }
        if self.current.is_some_and(|cur| target <= cur) {
            return Ok(());
        }
        if let Some(peeked) = &self.peeked {
            if peeked.key() >= target {
                return Ok(());
            }
            self.peeked = None;
        }
        self.state = IterState::Iterating;
        if self.bounds.map_or(true, |(_, max)| target > max) {
            self.state = IterState::Exhausted;
            return Ok(());
        }
        if let Err(err) = self.source.perform_skip_to(target) {
            self.state = IterState::Exhausted;
            return Err(err);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.source.release();
        self.peeked = None;
        self.state = IterState::Closed;
    }
}

impl<S: TokenSource> Iterator for RangeCursor<S> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_token()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

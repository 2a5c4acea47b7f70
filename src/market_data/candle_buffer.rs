use std::collections::VecDeque;

use super::candle::Candle;

// ---------------------------------------------------------------------------
// CandleBuffer -- bounded rolling window for one (symbol, interval)
// ---------------------------------------------------------------------------

/// Ring buffer holding the most recent candles of a single series, oldest
/// first.  Never holds more than `capacity` candles: an append that would
/// overflow evicts the oldest candle first.
///
/// The buffer itself is not synchronised; the owning service wraps it in a
/// lock.
#[derive(Debug, Clone)]
pub struct CandleBuffer {
    items: VecDeque<Candle>,
    capacity: usize,
}

impl CandleBuffer {
    /// Create an empty buffer.  A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append `candle`, evicting exactly one candle from the front when the
    /// buffer overflows.
    pub fn append(&mut self, candle: Candle) {
        self.items.push_back(candle);
        if self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Append every candle in order, as repeated [`append`](Self::append)
    /// calls would.
    pub fn append_all<I>(&mut self, candles: I)
    where
        I: IntoIterator<Item = Candle>,
    {
        for candle in candles {
            self.append(candle);
        }
    }

    /// Overwrite the most recent candle.  Returns `false` (and stores nothing)
    /// when the buffer is empty.
    pub fn replace_last(&mut self, candle: Candle) -> bool {
        match self.items.back_mut() {
            Some(last) => {
                *last = candle;
                true
            }
            None => false,
        }
    }

    /// Copy of the current contents, oldest first.
    pub fn all(&self) -> Vec<Candle> {
        self.items.iter().cloned().collect()
    }

    /// The most recent candle, if any.
    pub fn last(&self) -> Option<&Candle> {
        self.items.back()
    }

    /// Close price of every candle, oldest first.
    pub fn close_prices(&self) -> Vec<String> {
        self.items.iter().map(|c| c.close.clone()).collect()
    }

    /// Close prices of the last `min(count, len)` candles, oldest first.
    pub fn last_close_prices(&self, count: usize) -> Vec<String> {
        let start = self.items.len().saturating_sub(count);
        self.items
            .iter()
            .skip(start)
            .map(|c| c.close.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

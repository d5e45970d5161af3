//! Time-bounded history buffer

use std::collections::VecDeque;

/// Items stamped with a time, dropped once older than the window
#[derive(Debug, Clone)]
pub struct TimeWindow<T> {
    window_ms: i64,
    items: VecDeque<(i64, T)>,
}

impl<T> TimeWindow<T> {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            items: VecDeque::new(),
        }
    }

    /// Append an item. Items are expected in roughly increasing time order;
    /// pruning stops at the first item still inside the window.
    pub fn push(&mut self, ts: i64, item: T) {
        self.items.push_back((ts, item));
    }

    /// Drop items with `ts <= now - window`
    pub fn prune(&mut self, now: i64) -> usize {
        let cutoff = now.saturating_sub(self.window_ms);
        let mut dropped = 0;
        while let Some((ts, _)) = self.items.front() {
            if *ts > cutoff {
                break;
            }
            self.items.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|(_, item)| item)
    }

    pub fn iter_stamped(&self) -> impl Iterator<Item = (i64, &T)> {
        self.items.iter().map(|(ts, item)| (*ts, item))
    }

    pub fn retain(&mut self, mut f: impl FnMut(&T) -> bool) {
        self.items.retain(|(_, item)| f(item));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_drops_expired() {
        let mut w = TimeWindow::new(100);
        w.push(0, 'a');
        w.push(50, 'b');
        w.push(120, 'c');
        assert_eq!(w.prune(150), 2);
        assert_eq!(w.iter().copied().collect::<Vec<_>>(), vec!['c']);
    }
}

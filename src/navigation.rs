//! Selection over the match list
//!
//! The cursor only tracks an index; the session moves the highlight emphasis
//! to follow it.

/// Circular position over the current match list
///
/// Two states: empty (`current() == None`) and positioned at an index below
/// `total()`. Only the count updates and the three moves change it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigationCursor {
    current: Option<usize>,
    total: usize,
}

impl NavigationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new match count
    ///
    /// Going from empty to non-empty selects the first match; dropping to zero
    /// clears the selection; shrinking below the current index clamps it.
    pub fn set_count(&mut self, total: usize) {
        self.total = total;
        self.current = match (total, self.current) {
            (0, _) => None,
            (_, None) => Some(0),
            (n, Some(i)) => Some(i.min(n - 1)),
        };
    }

    /// Move selection to the next match, wrapping at the end
    pub fn next(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let next = self.current.map_or(0, |i| (i + 1) % self.total);
        self.current = Some(next);
        self.current
    }

    /// Move selection to the previous match, wrapping at the start
    pub fn previous(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let previous = match self.current {
            Some(i) if i > 0 => i - 1,
            _ => self.total - 1,
        };
        self.current = Some(previous);
        self.current
    }

    /// Select a specific match; out-of-range indices are ignored
    pub fn jump_to(&mut self, index: usize) -> Option<usize> {
        if index < self.total {
            self.current = Some(index);
        }
        self.current
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// "3 of 10" style label (1-based)
    pub fn label(&self) -> String {
        match self.current {
            Some(i) => format!("{} of {}", i + 1, self.total),
            None => "0 of 0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_count_clears_selection() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(4);
        cursor.set_count(0);
        assert_eq!(cursor.current(), None);
        assert_eq!(cursor.label(), "0 of 0");
    }

    #[test]
    fn test_first_count_selects_zero() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(3);
        assert_eq!(cursor.current(), Some(0));
        assert_eq!(cursor.label(), "1 of 3");
    }

    #[test]
    fn test_growing_count_keeps_position() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(3);
        cursor.jump_to(2);
        cursor.set_count(10);
        assert_eq!(cursor.current(), Some(2));
    }

    #[test]
    fn test_shrinking_count_clamps() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(5);
        cursor.jump_to(4);
        cursor.set_count(2);
        assert_eq!(cursor.current(), Some(1));
    }

    #[test]
    fn test_next_wraps() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(2);
        assert_eq!(cursor.next(), Some(1));
        assert_eq!(cursor.next(), Some(0));
    }

    #[test]
    fn test_previous_wraps() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(3);
        assert_eq!(cursor.previous(), Some(2));
        assert_eq!(cursor.previous(), Some(1));
    }

    #[test]
    fn test_next_then_previous_round_trips() {
        for total in 2..6 {
            for start in 0..total {
                let mut cursor = NavigationCursor::new();
                cursor.set_count(total);
                cursor.jump_to(start);
                cursor.next();
                cursor.previous();
                assert_eq!(cursor.current(), Some(start));
            }
        }
    }

    #[test]
    fn test_moves_on_empty_are_noops() {
        let mut cursor = NavigationCursor::new();
        assert_eq!(cursor.next(), None);
        assert_eq!(cursor.previous(), None);
        assert_eq!(cursor.jump_to(0), None);
    }

    #[test]
    fn test_jump_out_of_range_ignored() {
        let mut cursor = NavigationCursor::new();
        cursor.set_count(3);
        cursor.jump_to(1);
        assert_eq!(cursor.jump_to(3), Some(1));
    }
}

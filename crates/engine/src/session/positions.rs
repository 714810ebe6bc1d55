//! Session-scoped position cache
//!
//! Built fresh from the broker at session start, kept current by
//! applying fills as orders succeed, and discarded at session end.
//! Single writer: only the session runner mutates it.

use std::collections::HashMap;

use autotrader_core::{DetailedPositions, Positions};

#[derive(Debug, Default)]
pub struct PositionBook {
    /// account hash -> symbol -> plain quantity
    plain: HashMap<String, Positions>,
    /// account hash -> symbol -> detailed position
    detailed: HashMap<String, DetailedPositions>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plain(&mut self, hash: &str, positions: Positions) {
        self.plain.insert(hash.to_string(), positions);
    }

    pub fn set_detailed(&mut self, hash: &str, positions: DetailedPositions) {
        self.detailed.insert(hash.to_string(), positions);
    }

    pub fn has_hash(&self, hash: &str) -> bool {
        self.plain.contains_key(hash)
    }

    pub fn plain(&self, hash: &str) -> Option<&Positions> {
        self.plain.get(hash)
    }

    pub fn quantity(&self, hash: &str, symbol: &str) -> f64 {
        self.plain
            .get(hash)
            .and_then(|positions| positions.get(symbol))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn detailed(&self) -> &HashMap<String, DetailedPositions> {
        &self.detailed
    }

    pub fn detailed_for(&self, hash: &str) -> Option<&DetailedPositions> {
        self.detailed.get(hash)
    }

    /// Apply a fill so later triggers in the same pass see the new
    /// quantity
    pub fn apply_fill(&mut self, hash: &str, symbol: &str, delta: f64) {
        let entry = self
            .plain
            .entry(hash.to_string())
            .or_default()
            .entry(symbol.to_string())
            .or_insert(0.0);
        *entry += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_updates_quantity() {
        let mut book = PositionBook::new();
        book.set_plain("hash1", Positions::from([("AAPL".to_string(), 5.0)]));

        book.apply_fill("hash1", "AAPL", 3.0);
        assert_eq!(book.quantity("hash1", "AAPL"), 8.0);

        book.apply_fill("hash1", "AAPL", -8.0);
        assert_eq!(book.quantity("hash1", "AAPL"), 0.0);
    }

    #[test]
    fn test_fill_creates_missing_entry() {
        let mut book = PositionBook::new();
        book.apply_fill("hash1", "TSLA", 2.0);
        assert_eq!(book.quantity("hash1", "TSLA"), 2.0);
    }

    #[test]
    fn test_unknown_lookups_default_to_zero() {
        let book = PositionBook::new();
        assert_eq!(book.quantity("nope", "AAPL"), 0.0);
        assert!(!book.has_hash("nope"));
    }
}

//! Maps a request URL to exactly one strategy.

use super::{Strategy, StrategyRule};

/// Ordered (strategy, patterns) table.
///
/// Rules are evaluated top to bottom and patterns within a rule in order; the
/// first pattern that is a substring of the URL decides. Specificity plays no
/// part. Unmatched URLs use `NetworkFirst`.
#[derive(Debug, Clone)]
pub struct StrategyTable {
  rules: Vec<StrategyRule>,
}

impl StrategyTable {
  pub const DEFAULT: Strategy = Strategy::NetworkFirst;

  pub fn new(rules: Vec<StrategyRule>) -> Self {
    Self { rules }
  }

  pub fn select(&self, url: &str) -> Strategy {
    self
      .rules
      .iter()
      .find(|rule| rule.patterns.iter().any(|p| url.contains(p.as_str())))
      .map(|rule| rule.strategy)
      .unwrap_or(Self::DEFAULT)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

  fn default_table() -> StrategyTable {
    StrategyTable::new(Config::default().strategies)
  }

  #[test]
  fn test_default_table() {
    let table = default_table();
    assert_eq!(
      table.select("http://localhost:8080/api/services/summary"),
      Strategy::StaleWhileRevalidate
    );
    assert_eq!(
      table.select("http://localhost:8080/assets/css/advanced.css"),
      Strategy::CacheFirst
    );
    assert_eq!(
      table.select("https://fonts.gstatic.com/s/inter.woff2"),
      Strategy::CacheFirst
    );
    assert_eq!(
      table.select("http://localhost:8080/services/web"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_unmatched_defaults_to_network_first() {
    assert_eq!(
      default_table().select("http://localhost:8080/about"),
      Strategy::NetworkFirst
    );
    assert_eq!(
      StrategyTable::new(Vec::new()).select("http://x/"),
      Strategy::NetworkFirst
    );
  }

  #[test]
  fn test_table_order_beats_specificity() {
    // Matches both "/api/" (first rule) and "/assets/" (second rule)
    let url = "http://localhost:8080/assets/api/logo.png";
    assert_eq!(default_table().select(url), Strategy::StaleWhileRevalidate);

    let reordered = StrategyTable::new(vec![
      StrategyRule::new(Strategy::CacheFirst, &["/assets/"]),
      StrategyRule::new(Strategy::StaleWhileRevalidate, &["/assets/api/logo.png"]),
    ]);
    assert_eq!(reordered.select(url), Strategy::CacheFirst);
  }

  #[test]
  fn test_matches_anywhere_in_url() {
    // Substring matching includes the query string
    assert_eq!(
      default_table().select("http://localhost:8080/page?next=/demos/1"),
      Strategy::NetworkFirst
    );
    assert_eq!(
      default_table().select("http://localhost:8080/page?from=/data/x"),
      Strategy::StaleWhileRevalidate
    );
  }
}

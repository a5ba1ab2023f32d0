//! Keyword matcher - tests candidate display metadata against the watchlist.
//!
//! Pure with respect to its inputs: the same (name, symbol, watchlist)
//! tuple always yields the same result. The denylist is a quality filter
//! loaded from data at startup, never code constants.

use crate::types::{
    DenyKind, DenylistEntry, TokenCandidate, WatchlistEntry, PLACEHOLDER_NAME_PREFIX,
};
use std::collections::HashSet;
use tracing::debug;

pub struct KeywordMatcher {
    deny_name_patterns: Vec<String>,
    deny_addresses: HashSet<String>,
}

impl KeywordMatcher {
    /// Build the matcher from the store's denylist plus configured
    /// noise patterns. Everything is lowercased once, up front.
    pub fn new(denylist: Vec<DenylistEntry>, extra_name_patterns: &[String]) -> Self {
        let mut deny_name_patterns = Vec::new();
        let mut deny_addresses = HashSet::new();

        for entry in denylist {
            match entry.kind {
                DenyKind::Name => deny_name_patterns.push(entry.pattern.to_lowercase()),
                DenyKind::Address => {
                    deny_addresses.insert(entry.pattern);
                }
            }
        }
        deny_name_patterns.extend(extra_name_patterns.iter().map(|p| p.to_lowercase()));

        Self {
            deny_name_patterns,
            deny_addresses,
        }
    }

    /// Denylisted name patterns, for inspection in tests and operator tooling.
    pub fn deny_name_patterns(&self) -> &[String] {
        &self.deny_name_patterns
    }

    /// First watchlist entry matching the candidate, or none.
    ///
    /// Matching is case-insensitive substring over name and symbol; ties
    /// break in watchlist order. Placeholder-prefixed names are special:
    /// keywords are matched against the mint address (and symbol, if any)
    /// instead, so a generic keyword cannot match every placeholder.
    pub fn first_match<'a>(
        &self,
        candidate: &TokenCandidate,
        watchlist: &'a [WatchlistEntry],
    ) -> Option<&'a WatchlistEntry> {
        let address = candidate.mint.to_string();
        if self.deny_addresses.contains(&address) {
            debug!("Skipping denylisted address {}", address);
            return None;
        }

        let name = candidate.display_name().to_lowercase();
        let symbol = candidate.symbol.as_deref().map(str::to_lowercase);
        let is_placeholder = name.starts_with(&PLACEHOLDER_NAME_PREFIX.to_lowercase());

        if !is_placeholder {
            for pattern in &self.deny_name_patterns {
                let in_symbol = symbol.as_deref().is_some_and(|s| s.contains(pattern.as_str()));
                if name.contains(pattern.as_str()) || in_symbol {
                    debug!(
                        "Denylist pattern '{}' suppressed match for {}",
                        pattern, address
                    );
                    return None;
                }
            }
        }

        let address_lower = address.to_lowercase();
        watchlist.iter().find(|entry| {
            let keyword = entry.keyword.to_lowercase();
            if is_placeholder {
                address_lower.contains(&keyword)
                    || symbol.as_deref().is_some_and(|s| s.contains(&keyword))
            } else {
                name.contains(&keyword)
                    || symbol.as_deref().is_some_and(|s| s.contains(&keyword))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResolutionState;
    use solana_sdk::pubkey::Pubkey;

    fn named_candidate(name: &str, symbol: &str) -> TokenCandidate {
        let mut candidate =
            TokenCandidate::new(Pubkey::new_unique(), "sig".to_string(), 100, 101);
        candidate.name = Some(name.to_string());
        candidate.symbol = Some(symbol.to_string());
        candidate.resolution = ResolutionState::Resolved;
        candidate
    }

    fn entries(keywords: &[&str]) -> Vec<WatchlistEntry> {
        keywords
            .iter()
            .map(|k| WatchlistEntry {
                keyword: k.to_string(),
                scope: "default".to_string(),
            })
            .collect()
    }

    #[test]
    fn matches_are_case_insensitive() {
        let matcher = KeywordMatcher::new(Vec::new(), &[]);
        let candidate = named_candidate("MoonShot Inu", "MSI");
        let watchlist = entries(&["moon"]);

        let matched = matcher.first_match(&candidate, &watchlist);
        assert_eq!(matched.map(|e| e.keyword.as_str()), Some("moon"));
    }

    #[test]
    fn first_configured_entry_wins() {
        let matcher = KeywordMatcher::new(Vec::new(), &[]);
        let candidate = named_candidate("moon doge", "MD");
        let watchlist = entries(&["doge", "moon"]);

        let matched = matcher.first_match(&candidate, &watchlist);
        assert_eq!(matched.map(|e| e.keyword.as_str()), Some("doge"));
    }

    #[test]
    fn symbol_matches_too() {
        let matcher = KeywordMatcher::new(Vec::new(), &[]);
        let candidate = named_candidate("Some Token", "PEPE");
        let watchlist = entries(&["pepe"]);

        assert!(matcher.first_match(&candidate, &watchlist).is_some());
    }

    #[test]
    fn denylist_pattern_short_circuits() {
        let matcher = KeywordMatcher::new(Vec::new(), &["rug".to_string()]);
        let candidate = named_candidate("Moon Rug", "MR");
        let watchlist = entries(&["moon"]);

        assert!(matcher.first_match(&candidate, &watchlist).is_none());
        assert_eq!(matcher.deny_name_patterns(), &["rug".to_string()]);
    }

    #[test]
    fn denylisted_address_never_matches() {
        let candidate = named_candidate("Moonshot", "MOON");
        let denylist = vec![DenylistEntry {
            pattern: candidate.mint.to_string(),
            kind: DenyKind::Address,
        }];
        let matcher = KeywordMatcher::new(denylist, &[]);
        let watchlist = entries(&["moon"]);

        assert!(matcher.first_match(&candidate, &watchlist).is_none());
    }

    #[test]
    fn placeholder_names_match_on_address_fragment_only() {
        let matcher = KeywordMatcher::new(Vec::new(), &[]);
        let candidate = TokenCandidate::new(Pubkey::new_unique(), "sig".to_string(), 100, 101);
        let address_fragment = candidate.mint.to_string()[..4].to_lowercase();

        // A generic keyword must not match the synthesized prefix
        assert!(matcher
            .first_match(&candidate, &entries(&["unnamed"]))
            .is_none());

        // But an address fragment keyword does
        assert!(matcher
            .first_match(&candidate, &entries(&[address_fragment.as_str()]))
            .is_some());
    }

    #[test]
    fn same_inputs_same_result() {
        let matcher = KeywordMatcher::new(Vec::new(), &[]);
        let candidate = named_candidate("Moonshot", "MOON");
        let watchlist = entries(&["moon", "shot"]);

        let first = matcher
            .first_match(&candidate, &watchlist)
            .map(|e| e.keyword.clone());
        let second = matcher
            .first_match(&candidate, &watchlist)
            .map(|e| e.keyword.clone());
        assert_eq!(first, second);
    }
}

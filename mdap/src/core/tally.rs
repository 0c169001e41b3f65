//! Vote tally and the first-to-ahead-by-k rule.

use std::collections::HashMap;

/// One distinct canonical candidate and its votes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyEntry {
    pub text: String,
    /// Order in which this canonical text was first seen (0-based).
    pub first_seen: usize,
    pub votes: u32,
}

/// Votes keyed by canonical (trimmed) candidate text.
#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    entries: Vec<TallyEntry>,
    index: HashMap<String, usize>,
}

/// Canonical form used for deduplication: surrounding whitespace removed,
/// otherwise byte-equal.
pub fn canonicalize(text: &str) -> &str {
    text.trim()
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one vote for `text`, returning the candidate's insertion index.
    pub fn record(&mut self, text: &str) -> usize {
        let canonical = canonicalize(text);
        if let Some(&slot) = self.index.get(canonical) {
            self.entries[slot].votes += 1;
            return slot;
        }
        let slot = self.entries.len();
        self.entries.push(TallyEntry {
            text: canonical.to_string(),
            first_seen: slot,
            votes: 1,
        });
        self.index.insert(canonical.to_string(), slot);
        slot
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_votes(&self) -> u32 {
        self.entries.iter().map(|entry| entry.votes).sum()
    }

    /// Entries by votes descending, ties broken by earliest first-seen index.
    pub fn ranked(&self) -> Vec<&TallyEntry> {
        let mut ranked: Vec<&TallyEntry> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.votes
                .cmp(&a.votes)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        ranked
    }

    /// The leader, if it is ahead of the runner-up by at least `margin`.
    ///
    /// A lone candidate is compared against a runner-up with zero votes.
    pub fn leader_by_margin(&self, margin: u32) -> Option<&TallyEntry> {
        let ranked = self.ranked();
        let leader = *ranked.first()?;
        let runner_up = ranked.get(1).map_or(0, |entry| entry.votes);
        (leader.votes >= runner_up + margin).then_some(leader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally_of(texts: &[&str]) -> VoteTally {
        let mut tally = VoteTally::new();
        for text in texts {
            tally.record(text);
        }
        tally
    }

    #[test]
    fn record_deduplicates_on_trimmed_text() {
        let tally = tally_of(&["answer", "  answer\n", "Answer"]);
        assert_eq!(tally.len(), 2);
        assert_eq!(tally.ranked()[0].votes, 2);
        assert_eq!(tally.total_votes(), 3);
    }

    #[test]
    fn margin_one_short_never_wins() {
        for k in 1..6u32 {
            let mut tally = VoteTally::new();
            for _ in 0..(k - 1 + 3) {
                tally.record("A");
            }
            for _ in 0..3 {
                tally.record("B");
            }
            assert!(
                tally.leader_by_margin(k).is_none(),
                "margin {} must not satisfy k={k}",
                k - 1
            );
            tally.record("A");
            assert_eq!(tally.leader_by_margin(k).map(|e| e.text.as_str()), Some("A"));
        }
    }

    #[test]
    fn ties_resolve_to_first_seen() {
        let tally = tally_of(&["B", "A", "A", "B"]);
        let ranked = tally.ranked();
        assert_eq!(ranked[0].text, "B");
        assert_eq!(ranked[1].text, "A");
        assert!(tally.leader_by_margin(1).is_none());
    }

    #[test]
    fn lone_candidate_wins_once_votes_reach_margin() {
        let mut tally = tally_of(&["X"]);
        assert!(tally.leader_by_margin(2).is_none());
        tally.record("X");
        assert_eq!(tally.leader_by_margin(2).map(|e| e.votes), Some(2));
    }

    #[test]
    fn empty_tally_has_no_leader() {
        assert!(VoteTally::new().leader_by_margin(1).is_none());
    }
}

//! Precedence-ranked tag matching.

use std::collections::BTreeMap;

use super::{EngTeam, EntityMatcher, TeamDirectory};

/// A matcher that overlaps the event tags.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub team: &'a EngTeam,
    pub matcher: &'a EntityMatcher,
    pub precedence: u8,
    pub match_count: usize,
}

/// Result of routing an event.
#[derive(Debug, Clone)]
pub struct TeamMatch<'a> {
    /// Owning team; the directory fallback when no candidate exists.
    pub team: &'a EngTeam,
    /// All candidates, best first.
    pub candidates: Vec<Candidate<'a>>,
}

impl TeamMatch<'_> {
    /// Whether the fallback team was used.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Routing explanation appended to task notes.
    #[must_use]
    pub fn explanation(&self) -> String {
        let Some(best) = self.candidates.first() else {
            return format!(
                "Routing: no team matcher claimed this event; assigned to default team {}",
                self.team.name
            );
        };
        format!(
            "Routing: assigned to {} by matcher {} (precedence {}, {} of {} tags matched, {} candidate{})",
            best.team.name,
            best.matcher.describe(),
            best.precedence,
            best.match_count,
            best.matcher.tags.len(),
            self.candidates.len(),
            if self.candidates.len() == 1 { "" } else { "s" },
        )
    }
}

/// Rank every matcher of every team against the event tags.
///
/// A matcher with no satisfied tag is dropped. Survivors are ordered by
/// precedence, then match count, both descending. The sort is stable, so
/// full ties keep directory declaration order.
#[must_use]
pub fn rank<'a>(teams: &'a [EngTeam], tags: &BTreeMap<String, String>) -> Vec<Candidate<'a>> {
    let mut candidates: Vec<Candidate<'a>> = teams
        .iter()
        .flat_map(|team| {
            team.entities.iter().filter_map(move |matcher| {
                let match_count = matcher.match_count(tags);
                (match_count > 0).then_some(Candidate {
                    team,
                    matcher,
                    precedence: matcher.precedence,
                    match_count,
                })
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        (b.precedence, b.match_count).cmp(&(a.precedence, a.match_count))
    });
    candidates
}

impl TeamDirectory {
    /// Route event tags to the owning team. Never fails.
    #[must_use]
    pub fn match_tags(&self, tags: &BTreeMap<String, String>) -> TeamMatch<'_> {
        let candidates = rank(self.teams(), tags);
        let team = candidates.first().map_or_else(|| self.fallback(), |c| c.team);
        TeamMatch { team, candidates }
    }
}

use crate::types::ScoredCandidate;
use std::collections::HashSet;

/// Picks a small, diverse set of servers to test against.
#[derive(Debug, Clone)]
pub struct ServerSelector {
    max_servers: usize,
    fallback_pool: usize,
    required_capacity_mbps: f64,
}

impl ServerSelector {
    pub fn new(max_servers: usize, fallback_pool: usize, required_capacity_mbps: f64) -> Self {
        Self {
            max_servers,
            fallback_pool,
            required_capacity_mbps,
        }
    }

    /// `scored` must already be sorted best first.
    ///
    /// Returns at most `max_servers` entries; an empty input is not an error.
    pub fn select(&self, scored: &[ScoredCandidate]) -> Vec<ScoredCandidate> {
        if scored.is_empty() || self.max_servers == 0 {
            return Vec::new();
        }

        let pool = self.eligible_pool(scored);

        let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(self.max_servers);
        let mut providers: HashSet<&str> = HashSet::new();
        let mut locations: HashSet<(&str, &str)> = HashSet::new();

        // 1. 最高分的一定入选
        // 2. 只要带来新的运营商或新的 (城市, 国家) 就加入
        for candidate in &pool {
            if selected.len() >= self.max_servers {
                break;
            }
            if selected.iter().any(|s| s.server.same_endpoint(&candidate.server)) {
                continue;
            }

            let provider = candidate.server.provider.as_str();
            let location = (candidate.server.site.as_str(), candidate.server.country.as_str());
            if !selected.is_empty() && providers.contains(provider) && locations.contains(&location) {
                continue;
            }

            providers.insert(provider);
            locations.insert(location);
            selected.push((*candidate).clone());
        }

        // 3. 名额不足时按分数补齐, 不再考虑多样性
        for candidate in &pool {
            if selected.len() >= self.max_servers {
                break;
            }
            if !selected.iter().any(|s| s.server.same_endpoint(&candidate.server)) {
                selected.push((*candidate).clone());
            }
        }

        selected.truncate(self.max_servers);
        selected
    }

    /// Strict tier: servers with enough headroom. Falls back to the top of
    /// the full list when that leaves fewer than `max_servers` candidates.
    fn eligible_pool<'s>(&self, scored: &'s [ScoredCandidate]) -> Vec<&'s ScoredCandidate> {
        let strict: Vec<&ScoredCandidate> = scored
            .iter()
            .filter(|c| c.bandwidth_mbps >= self.required_capacity_mbps)
            .collect();

        if strict.len() >= self.max_servers {
            return strict;
        }

        tracing::info!(
            required_mbps = self.required_capacity_mbps,
            qualifying = strict.len(),
            "not enough high-capacity servers, using best available"
        );
        scored.iter().take(self.fallback_pool).collect()
    }
}

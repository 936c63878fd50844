use crate::geo::{distance_km, CoordinateResolver};
use crate::types::{Location, ScoredCandidate, ServerRecord};

/// Assumed local bandwidth when no prior speed test is available (1 Gbps)
pub const DEFAULT_USER_BANDWIDTH_MBPS: f64 = 1000.0;
const HIGH_SPEED_THRESHOLD_MBPS: f64 = 10_000.0;
const HIGH_SPEED_ASSUMED_MBPS: f64 = 25_000.0;

const HEADROOM_FACTOR: f64 = 1.5;

const BANDWIDTH_WEIGHT: f64 = 0.8;
const DISTANCE_WEIGHT: f64 = 0.2;

/// Normalize a prior local speed test reading.
///
/// Missing or non-positive means unknown (1 Gbps). Anything above 10 Gbps
/// is treated as a 25 Gbps link.
pub fn effective_user_bandwidth(estimated_mbps: Option<f64>) -> f64 {
    match estimated_mbps {
        Some(v) if v.is_finite() && v > HIGH_SPEED_THRESHOLD_MBPS => HIGH_SPEED_ASSUMED_MBPS,
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => DEFAULT_USER_BANDWIDTH_MBPS,
    }
}

/// `0.8 * bandwidthScore - 0.2 * distanceScore`, both on a 0-100 scale.
///
/// Capacity saturates at 100 Gbps, distance at 20,000 km.
pub fn composite_score(advertised_gbps: f64, distance_km: u32) -> f64 {
    let bandwidth_score = (advertised_gbps / 100.0 * 100.0).min(100.0);
    let distance_score = (distance_km as f64 / 200.0).min(100.0);
    BANDWIDTH_WEIGHT * bandwidth_score - DISTANCE_WEIGHT * distance_score
}

pub struct CapacityScorer<'a> {
    resolver: CoordinateResolver<'a>,
    user_bandwidth_mbps: f64,
}

impl<'a> CapacityScorer<'a> {
    pub fn new(resolver: CoordinateResolver<'a>, estimated_mbps: Option<f64>) -> Self {
        Self {
            resolver,
            user_bandwidth_mbps: effective_user_bandwidth(estimated_mbps),
        }
    }

    pub fn user_bandwidth_mbps(&self) -> f64 {
        self.user_bandwidth_mbps
    }

    /// Score every locatable candidate relative to `origin`, best first.
    pub fn score(&self, candidates: Vec<ServerRecord>, origin: &Location) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .filter_map(|server| {
                let Some((lat, lon)) = self.resolver.resolve(&server.country, &server.site) else {
                    tracing::debug!(host = %server.host, "no coordinates, skipping");
                    return None;
                };

                let distance = distance_km(origin.latitude, origin.longitude, lat, lon);
                let score = composite_score(server.advertised_bandwidth_gbps, distance);

                Some(ScoredCandidate {
                    bandwidth_mbps: server.advertised_bandwidth_gbps * 1000.0,
                    distance_km: distance,
                    score,
                    server,
                })
            })
            .collect();

        // 稳定排序: 同分时保持目录原有顺序
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    /// Server capacity needed (1.5x the local link) so the server is not the bottleneck.
    pub fn required_capacity_mbps(&self) -> f64 {
        self.user_bandwidth_mbps * HEADROOM_FACTOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{CountryEntry, SiteTable};
    use std::collections::HashMap;

    fn origin() -> Location {
        Location {
            ip: "203.0.113.1".to_string(),
            city: "Somewhere".to_string(),
            region: "PA".to_string(),
            country: "US".to_string(),
            latitude: 40.0,
            longitude: -75.0,
        }
    }

    fn record(host: &str, country: &str, site: &str, gbps: f64) -> ServerRecord {
        ServerRecord {
            host: host.to_string(),
            port: 5201,
            site: site.to_string(),
            country: country.to_string(),
            continent: String::new(),
            provider: format!("{}-provider", host),
            advertised_bandwidth_gbps: gbps,
            capacity_label: gbps.to_string(),
            test_command_template: format!("iperf3 -c {}", host),
            supports_reverse_mode: true,
        }
    }

    fn table() -> SiteTable {
        let mut us = HashMap::new();
        us.insert("Philadelphia".to_string(), [39.9526, -75.1652]);
        let mut au = HashMap::new();
        au.insert("Sydney".to_string(), [-33.8688, 151.2093]);

        let mut table = SiteTable::new();
        table.insert(
            "US".to_string(),
            CountryEntry {
                centroid: [37.0902, -95.7129],
                sites: us,
            },
        );
        table.insert(
            "AU".to_string(),
            CountryEntry {
                centroid: [-25.2744, 133.7751],
                sites: au,
            },
        );
        table
    }

    #[test]
    fn test_effective_user_bandwidth() {
        assert_eq!(effective_user_bandwidth(None), 1000.0);
        assert_eq!(effective_user_bandwidth(Some(0.0)), 1000.0);
        assert_eq!(effective_user_bandwidth(Some(-3.0)), 1000.0);
        assert_eq!(effective_user_bandwidth(Some(940.0)), 940.0);
        assert_eq!(effective_user_bandwidth(Some(10_000.0)), 10_000.0);
        assert_eq!(effective_user_bandwidth(Some(12_000.0)), 25_000.0);
        assert_eq!(effective_user_bandwidth(Some(90_000.0)), 25_000.0);
    }

    #[test]
    fn test_composite_score_weights() {
        // 10 Gbps at 100 km vs 100 Gbps at 10,000 km
        let near = composite_score(10.0, 100);
        let far = composite_score(100.0, 10_000);
        assert!((near - 7.9).abs() < 1e-9);
        assert!((far - 70.0).abs() < 1e-9);
        assert!(near < far);
    }

    #[test]
    fn test_composite_score_saturates() {
        assert_eq!(composite_score(400.0, 0), 80.0);
        assert_eq!(composite_score(0.0, 40_000), -20.0);
    }

    #[test]
    fn test_score_sorts_and_drops_unknown() {
        let table = table();
        let scorer = CapacityScorer::new(CoordinateResolver::new(&table), None);
        let scored = scorer.score(
            vec![
                record("near", "US", "Philadelphia", 10.0),
                record("lost", "ZZ", "Nowhere", 100.0),
                record("far", "AU", "Sydney", 100.0),
            ],
            &origin(),
        );

        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].server.host, "far");
        assert_eq!(scored[1].server.host, "near");
        assert_eq!(scored[1].bandwidth_mbps, 10_000.0);
        assert!(scored[1].distance_km < 50);
        assert!(scored[0].distance_km > 15_000);
    }

    #[test]
    fn test_required_capacity_uses_effective_bandwidth() {
        let table = table();
        let resolver = CoordinateResolver::new(&table);

        assert_eq!(CapacityScorer::new(resolver, None).required_capacity_mbps(), 1500.0);
        // 20 Gbps 的用户被视为 25 Gbps
        assert_eq!(
            CapacityScorer::new(resolver, Some(20_000.0)).required_capacity_mbps(),
            37_500.0
        );
    }
}

//! One netblast run: locate, fetch, score, select, test, rank.
//!
//! Location and catalog failures are fatal; everything after selection only
//! ever degrades individual rows.

use crate::aggregate::aggregate;
use crate::catalog::ServerCatalog;
use crate::config::{self, Settings};
use crate::error::{NetblastError, Result};
use crate::geo::{CoordinateResolver, SiteTable};
use crate::locator::GeoLocator;
use crate::runner::TestRunner;
use crate::scoring::CapacityScorer;
use crate::selection::ServerSelector;
use crate::traits::ThroughputProbe;
use crate::types::{Location, ScoredCandidate, ServerRecord, TestResult};
use reqwest::Client;

/// Servers chosen for testing, plus the context they were chosen in.
#[derive(Debug, Clone)]
pub struct Plan {
    pub origin: Location,
    pub user_bandwidth_mbps: f64,
    /// Usable catalog entries before scoring
    pub catalog_size: usize,
    pub selected: Vec<ScoredCandidate>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

pub struct Session<'t> {
    settings: Settings,
    table: &'t SiteTable,
    client: Client,
}

impl Session<'static> {
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_table(settings, config::site_table())
    }
}

impl<'t> Session<'t> {
    pub fn with_table(settings: Settings, table: &'t SiteTable) -> Result<Self> {
        let settings = settings.sanitized();
        let client = Client::builder()
            .timeout(settings.http_timeout())
            .connect_timeout(settings.http_timeout())
            .user_agent(concat!("netblast/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NetblastError::NetworkUnavailable(e.to_string()))?;

        Ok(Self {
            settings,
            table,
            client,
        })
    }

    fn resolver(&self) -> CoordinateResolver<'t> {
        CoordinateResolver::new(self.table)
    }

    pub async fn locate(&self) -> Result<Location> {
        GeoLocator::new(self.client.clone(), &self.settings.geo_url)
            .locate()
            .await
    }

    /// Locate the operator and fetch the catalog (sequentially), then select.
    pub async fn plan(&self, estimated_mbps: Option<f64>) -> Result<Plan> {
        let origin = self.locate().await?;
        tracing::info!(
            city = %origin.city,
            country = %origin.country,
            lat = origin.latitude,
            lon = origin.longitude,
            "resolved self location"
        );

        let catalog = ServerCatalog::new(self.client.clone(), &self.settings.feed_url)?;
        let records = catalog.fetch(&self.resolver()).await?;

        Ok(self.plan_from(origin, records, estimated_mbps))
    }

    /// Score and select from already-fetched inputs. No I/O.
    pub fn plan_from(
        &self,
        origin: Location,
        records: Vec<ServerRecord>,
        estimated_mbps: Option<f64>,
    ) -> Plan {
        let catalog_size = records.len();
        let scorer = CapacityScorer::new(self.resolver(), estimated_mbps);
        let scored = scorer.score(records, &origin);

        let selector = ServerSelector::new(
            self.settings.max_servers,
            self.settings.fallback_pool,
            scorer.required_capacity_mbps(),
        );
        let selected = selector.select(&scored);
        tracing::info!(
            catalog_size,
            scored = scored.len(),
            selected = selected.len(),
            "server selection done"
        );

        Plan {
            origin,
            user_bandwidth_mbps: scorer.user_bandwidth_mbps(),
            catalog_size,
            selected,
        }
    }

    /// Test every planned server and return ranked results.
    pub async fn execute(&self, plan: &Plan, probe: &dyn ThroughputProbe, progress: bool) -> Vec<TestResult> {
        if plan.is_empty() {
            return Vec::new();
        }

        let runner = TestRunner::new(probe);
        let runner = if progress { runner } else { runner.quiet() };

        aggregate(runner.run(&plan.selected).await)
    }
}

use crate::error::{NetblastError, Result};
use crate::geo::CoordinateResolver;
use crate::types::ServerRecord;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const DEFAULT_PORT: u16 = 5201;
const DEFAULT_CAPACITY_GBPS: f64 = 1.0;
const REVERSE_FLAG: &str = "-R";

/// iperf3serverlist.net 导出格式中的一条
#[derive(Debug, Default, Deserialize)]
struct FeedEntry {
    #[serde(rename = "IP_HOST", default, deserialize_with = "lenient_string")]
    launch_command: String,
    #[serde(rename = "OPTIONS", default, deserialize_with = "lenient_string")]
    options: String,
    #[serde(rename = "GB_S", default, deserialize_with = "lenient_string")]
    capacity: String,
    #[serde(rename = "COUNTRY", default, deserialize_with = "lenient_string")]
    country: String,
    #[serde(rename = "SITE", default, deserialize_with = "lenient_string")]
    site: String,
    #[serde(rename = "CONTINENT", default, deserialize_with = "lenient_string")]
    continent: String,
    #[serde(rename = "PROVIDER", default, deserialize_with = "lenient_string")]
    provider: String,
}

// The feed is hand-maintained: numbers, nulls and strings all show up.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

/// Fetches and normalizes the remote list of public iperf3 servers.
pub struct ServerCatalog {
    client: Client,
    url: String,
    host_re: Regex,
    port_re: Regex,
}

impl ServerCatalog {
    pub fn new(client: Client, url: &str) -> Result<Self> {
        Ok(Self {
            client,
            url: url.to_string(),
            host_re: Regex::new(r"(?:^|\s)-c\s+(\S+)")?,
            // "-p 5201" 或 "-p 5201-5210", 取区间的第一个端口
            port_re: Regex::new(r"(?:^|\s)-p\s+(\d+)(?:-\d+)?(?:\s|$)")?,
        })
    }

    pub async fn fetch(&self, resolver: &CoordinateResolver<'_>) -> Result<Vec<ServerRecord>> {
        tracing::debug!(url = %self.url, "fetching server catalog");

        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| NetblastError::NetworkUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NetblastError::NetworkUnavailable(format!(
                "server feed returned {}",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| NetblastError::NetworkUnavailable(e.to_string()))?;

        self.parse_feed(&body, resolver)
    }

    /// Decode the feed. A malformed document is fatal; a malformed or
    /// unlocatable entry is skipped.
    pub fn parse_feed(
        &self,
        body: &str,
        resolver: &CoordinateResolver<'_>,
    ) -> Result<Vec<ServerRecord>> {
        let entries: Vec<FeedEntry> =
            serde_json::from_str(body).map_err(|e| NetblastError::parse("server feed", e.to_string()))?;
        let total = entries.len();

        let records: Vec<ServerRecord> = entries
            .into_iter()
            .filter_map(|entry| self.to_record(entry))
            .filter(|record| {
                let known = resolver.resolve(&record.country, &record.site).is_some();
                if !known {
                    tracing::debug!(
                        host = %record.host,
                        country = %record.country,
                        site = %record.site,
                        "dropping server with unknown location"
                    );
                }
                known
            })
            .collect();

        tracing::info!(total, usable = records.len(), "parsed server catalog");
        Ok(records)
    }

    fn to_record(&self, entry: FeedEntry) -> Option<ServerRecord> {
        let Some((host, port)) = self.parse_launch_command(&entry.launch_command) else {
            tracing::debug!(command = %entry.launch_command, "dropping unparsable launch command");
            return None;
        };

        let test_command_template = if self.host_re.is_match(&entry.launch_command) {
            entry.launch_command.clone()
        } else {
            format!("iperf3 -c {}", host)
        };

        Some(ServerRecord {
            host,
            port,
            site: entry.site,
            country: entry.country,
            continent: entry.continent,
            provider: entry.provider,
            advertised_bandwidth_gbps: parse_capacity(&entry.capacity),
            capacity_label: entry.capacity,
            test_command_template,
            supports_reverse_mode: entry.options.contains(REVERSE_FLAG),
        })
    }

    /// Extract `(host, port)` from e.g. `iperf3 -c speed.example.net -p 5201-5210`.
    ///
    /// A bare hostname is accepted too. The port defaults to 5201.
    pub fn parse_launch_command(&self, command: &str) -> Option<(String, u16)> {
        let command = command.trim();

        let host = match self.host_re.captures(command) {
            Some(caps) => caps[1].to_string(),
            None => {
                let mut tokens = command.split_whitespace();
                match (tokens.next(), tokens.next()) {
                    (Some(token), None) if !token.starts_with('-') => token.to_string(),
                    _ => return None,
                }
            }
        };

        if host.is_empty() || host.starts_with('-') {
            return None;
        }

        let port = match self.port_re.captures(command) {
            Some(caps) => match caps[1].parse::<u16>() {
                Ok(p) if p > 0 => p,
                _ => return None,
            },
            None => DEFAULT_PORT,
        };

        Some((host, port))
    }
}

/// Advertised capacity in Gbps.
///
/// Accepts "40", "2x10" (= 20), "2 × 10", "10G", "10 Gbps". Anything else,
/// including zero or negative figures, counts as 1 Gbps.
pub fn parse_capacity(raw: &str) -> f64 {
    let cleaned = raw.trim().to_ascii_lowercase();
    let cleaned = cleaned
        .trim_end_matches("gbps")
        .trim_end_matches("gbit/s")
        .trim_end_matches('g')
        .trim();

    let parts: Vec<&str> = cleaned.split(['x', '×']).map(str::trim).collect();
    let value = match parts.as_slice() {
        [single] => single.parse::<f64>().ok(),
        [count, speed] => match (count.parse::<f64>(), speed.parse::<f64>()) {
            (Ok(c), Ok(s)) => Some(c * s),
            _ => None,
        },
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => DEFAULT_CAPACITY_GBPS,
    }
}

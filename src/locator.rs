use crate::error::{NetblastError, Result};
use crate::types::Location;
use reqwest::Client;
use serde::Deserialize;

/// ipinfo.io 风格的响应体
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeoResponse {
    ip: String,
    city: String,
    region: String,
    country: String,
    /// "lat,lon"
    loc: String,
}

/// Resolves the operator's approximate position with one IP-geolocation lookup.
pub struct GeoLocator {
    client: Client,
    url: String,
}

impl GeoLocator {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    /// No retry here: a failure aborts the run.
    pub async fn locate(&self) -> Result<Location> {
        tracing::debug!(url = %self.url, "looking up self location");

        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| NetblastError::NetworkUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NetblastError::NetworkUnavailable(format!(
                "geolocation service returned {}",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| NetblastError::NetworkUnavailable(e.to_string()))?;

        parse_location(&body)
    }
}

/// Parse a geolocation response. Country and both coordinates are mandatory.
pub fn parse_location(body: &str) -> Result<Location> {
    let geo: GeoResponse =
        serde_json::from_str(body).map_err(|e| NetblastError::parse("location", e.to_string()))?;

    let country = geo.country.trim();
    if country.is_empty() {
        return Err(NetblastError::parse("location", "missing country"));
    }

    let (latitude, longitude) = parse_lat_lon(&geo.loc)?;

    Ok(Location {
        ip: geo.ip,
        city: geo.city,
        region: geo.region,
        country: country.to_string(),
        latitude,
        longitude,
    })
}

fn parse_lat_lon(loc: &str) -> Result<(f64, f64)> {
    let (lat, lon) = loc
        .split_once(',')
        .ok_or_else(|| NetblastError::parse("location", format!("bad loc '{}'", loc)))?;

    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|_| NetblastError::parse("location", format!("bad latitude '{}'", lat)))?;
    let lon: f64 = lon
        .trim()
        .parse()
        .map_err(|_| NetblastError::parse("location", format!("bad longitude '{}'", lon)))?;

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(NetblastError::parse(
            "location",
            format!("coordinates out of range ({}, {})", lat, lon),
        ));
    }

    Ok((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Address nothing listens on.
    async fn refused_url(path: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}{}", addr, path)
    }

    /// One-shot server answering every request with a 500.
    async fn failing_url(path: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });
        format!("http://{}{}", addr, path)
    }

    fn local_client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_parse_ipinfo_response() -> Result<()> {
        let body = r#"{
            "ip": "203.0.113.7",
            "city": "Philadelphia",
            "region": "Pennsylvania",
            "country": "US",
            "loc": "39.9526,-75.1652",
            "timezone": "America/New_York"
        }"#;

        let loc = parse_location(body)?;
        assert_eq!(loc.city, "Philadelphia");
        assert_eq!(loc.country, "US");
        assert_eq!(loc.latitude, 39.9526);
        assert_eq!(loc.longitude, -75.1652);
        Ok(())
    }

    #[test]
    fn test_missing_loc_fails_closed() {
        let body = r#"{"ip": "203.0.113.7", "city": "X", "country": "US"}"#;
        assert!(matches!(
            parse_location(body),
            Err(NetblastError::ParseFailure { .. })
        ));
    }

    #[test]
    fn test_missing_country_fails_closed() {
        let body = r#"{"city": "X", "loc": "1.0,2.0"}"#;
        assert!(parse_location(body).is_err());
    }

    #[test]
    fn test_unparsable_coordinates() {
        for loc in ["abc,1.0", "1.0,", "1.0", "95.0,10.0", "10.0,200.0"] {
            let body = format!(r#"{{"country": "US", "loc": "{}"}}"#, loc);
            assert!(parse_location(&body).is_err(), "accepted '{}'", loc);
        }
    }

    #[test]
    fn test_non_json_body() {
        assert!(parse_location("<html>rate limited</html>").is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_unavailable() {
        let url = refused_url("/json").await;
        let err = GeoLocator::new(local_client(), &url).locate().await.unwrap_err();
        assert!(matches!(err, NetblastError::NetworkUnavailable(_)), "got {:?}", err);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_server_error_is_network_unavailable() {
        let url = failing_url("/json").await;
        let err = GeoLocator::new(local_client(), &url).locate().await.unwrap_err();
        assert!(matches!(err, NetblastError::NetworkUnavailable(_)), "got {:?}", err);
        assert!(err.to_string().contains("500"));
        assert!(err.is_fatal());
    }
}

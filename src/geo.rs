use serde::Deserialize;
use std::collections::HashMap;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// 某国家的坐标数据: 国家中心点 + 已知站点
#[derive(Debug, Clone, Deserialize)]
pub struct CountryEntry {
    pub centroid: [f64; 2],
    #[serde(default)]
    pub sites: HashMap<String, [f64; 2]>,
}

/// ISO country code -> coordinates
pub type SiteTable = HashMap<String, CountryEntry>;

/// Great-circle distance in whole kilometres (Haversine, spherical Earth).
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> u32 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (d_lon / 2.0).sin().powi(2);
    // 浮点误差可能让 a 略微越界
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    (EARTH_RADIUS_KM * c).round() as u32
}

/// Maps (country, site) to approximate coordinates using a static table.
///
/// A listed site wins over the country centroid; an unknown country yields
/// `None` so the candidate is dropped instead of being scored at (0, 0).
#[derive(Debug, Clone, Copy)]
pub struct CoordinateResolver<'a> {
    table: &'a SiteTable,
}

impl<'a> CoordinateResolver<'a> {
    pub fn new(table: &'a SiteTable) -> Self {
        Self { table }
    }

    pub fn resolve(&self, country: &str, site: &str) -> Option<(f64, f64)> {
        let entry = self.country(country)?;
        let site = site.trim();

        // 精确匹配优先; 仅大小写不同的多个名称取字典序最小者, 结果与 HashMap 顺序无关
        let coords = entry
            .sites
            .get(site)
            .or_else(|| {
                entry
                    .sites
                    .iter()
                    .filter(|(name, _)| name.eq_ignore_ascii_case(site))
                    .min_by(|a, b| a.0.cmp(b.0))
                    .map(|(_, coords)| coords)
            })
            .copied()
            .unwrap_or(entry.centroid);

        Some((coords[0], coords[1]))
    }

    fn country(&self, country: &str) -> Option<&'a CountryEntry> {
        let code = country.trim().to_ascii_uppercase();
        let code = match code.as_str() {
            "UK" => "GB".to_string(),
            _ => code,
        };
        self.table.get(&code)
    }
}

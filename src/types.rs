use serde::Serialize;

/// 未测量的哨兵值
pub const UNMEASURED: f64 = -1.0;

/// 本机大致位置 (由 IP 地理定位得到)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub ip: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// 服务器目录中的一条记录
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord {
    pub host: String,
    pub port: u16,
    pub site: String,
    pub country: String,
    pub continent: String,
    pub provider: String,
    pub advertised_bandwidth_gbps: f64,
    /// Raw capacity string from the feed, e.g. "2x10"
    pub capacity_label: String,
    pub test_command_template: String,
    pub supports_reverse_mode: bool,
}

impl ServerRecord {
    /// "City, Country" key used for display and location diversity.
    pub fn location(&self) -> String {
        format!("{}, {}", self.site, self.country)
    }

    pub fn same_endpoint(&self, other: &ServerRecord) -> bool {
        self.host == other.host && self.port == other.port
    }
}

/// 打分后的候选服务器
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub server: ServerRecord,
    pub distance_km: u32,
    pub bandwidth_mbps: f64,
    pub score: f64,
}

/// 测试方向 (从发起方视角)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    /// Reverse mode (`-R`)
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// 单次测量使用的参数档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Full duration, the server's own launch command.
    Primary,
    /// Shorter duration, single connection, plain host/port.
    Degraded,
}

/// 单台服务器的测速结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub host: String,
    pub port: u16,
    pub location: String,
    pub distance_km: u32,
    pub capacity: String,
    pub download_mbps: f64, // 若未测量则为 -1
    pub upload_mbps: f64,   // 若未测量则为 -1
    pub completed: bool,
    pub rank: usize,
}

impl TestResult {
    /// Fresh result with both legs unmeasured.
    pub fn pending(candidate: &ScoredCandidate) -> Self {
        Self {
            host: candidate.server.host.clone(),
            port: candidate.server.port,
            location: candidate.server.location(),
            distance_km: candidate.distance_km,
            capacity: candidate.server.capacity_label.clone(),
            download_mbps: UNMEASURED,
            upload_mbps: UNMEASURED,
            completed: false,
            rank: 0,
        }
    }

    pub fn has_download(&self) -> bool {
        self.download_mbps > 0.0
    }

    pub fn has_upload(&self) -> bool {
        self.upload_mbps > 0.0
    }

    /// `completed` holds iff both legs produced a positive figure.
    pub fn refresh_completed(&mut self) {
        self.completed = self.has_download() && self.has_upload();
    }
}

use async_trait::async_trait;
use crate::error::Result;
use crate::types::{Attempt, Direction, ServerRecord};

/// ThroughputProbe: 所有吞吐量测试后端必须实现的接口
#[async_trait]
pub trait ThroughputProbe: Sync + Send {
    /// 后端名称 (如 "iperf3")
    fn name(&self) -> &'static str;

    /// 检查外部工具是否可用, 不可用则整个测试无法进行
    fn ensure_available(&self) -> Result<()>;

    /// 对单台服务器执行一次测量, 返回 Mbps
    /// 超时、进程失败、输出格式错误都以 Err 返回, 由调用方决定是否重试
    async fn measure(
        &self,
        server: &ServerRecord,
        direction: Direction,
        attempt: Attempt,
    ) -> Result<f64>;
}

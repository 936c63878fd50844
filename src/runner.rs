use crate::traits::ThroughputProbe;
use crate::types::{Attempt, Direction, ScoredCandidate, TestResult};
use indicatif::{ProgressBar, ProgressStyle};

/// Per-server test progression.
///
/// `Pending -> Download(Primary) -> (ok: Upload(Primary) | err: Download(Degraded)) -> ... -> Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Download(Attempt),
    Upload(Attempt),
    Done,
}

/// 失败后只允许一次降级重试
fn retry_of(attempt: Attempt) -> Option<Attempt> {
    match attempt {
        Attempt::Primary => Some(Attempt::Degraded),
        Attempt::Degraded => None,
    }
}

/// Runs download/upload tests against every selected server concurrently.
pub struct TestRunner<'p> {
    probe: &'p dyn ThroughputProbe,
    show_progress: bool,
}

impl<'p> TestRunner<'p> {
    pub fn new(probe: &'p dyn ThroughputProbe) -> Self {
        Self {
            probe,
            show_progress: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// 并发测试所有选中的服务器
    ///
    /// 逻辑:
    /// 1. 每台服务器一个异步任务, 任务只返回自己的结果
    /// 2. 等待全部任务完成 (join_all), 没有整体截止时间
    /// 3. 结果未排序, 交给 aggregate
    pub async fn run(&self, selected: &[ScoredCandidate]) -> Vec<TestResult> {
        let pb = if self.show_progress {
            ProgressBar::new(selected.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map(|style| style.progress_chars("|| "))
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message("Testing...");

        let tasks = selected.iter().map(|candidate| {
            let pb = pb.clone();
            async move {
                let result = self.test_server(candidate).await;
                pb.inc(1);
                result
            }
        });

        let results = futures::future::join_all(tasks).await;

        pb.finish_with_message("Testing completed.");
        results
    }

    /// 单台服务器的测试流程, 失败只体现在结果中的 -1
    async fn test_server(&self, candidate: &ScoredCandidate) -> TestResult {
        let server = &candidate.server;
        let mut result = TestResult::pending(candidate);
        let mut state = TaskState::Pending;

        loop {
            state = match state {
                TaskState::Pending => TaskState::Download(Attempt::Primary),

                TaskState::Download(attempt) => {
                    match self.probe.measure(server, Direction::Download, attempt).await {
                        Ok(mbps) if mbps > 0.0 => {
                            result.download_mbps = mbps;
                            if server.supports_reverse_mode {
                                TaskState::Upload(Attempt::Primary)
                            } else {
                                tracing::debug!(host = %server.host, "server has no reverse mode, skipping upload");
                                TaskState::Done
                            }
                        }
                        outcome => {
                            tracing::warn!(
                                host = %server.host,
                                ?attempt,
                                error = %describe_failure(&outcome),
                                "download test failed"
                            );
                            retry_of(attempt).map_or(TaskState::Done, TaskState::Download)
                        }
                    }
                }

                TaskState::Upload(attempt) => {
                    match self.probe.measure(server, Direction::Upload, attempt).await {
                        Ok(mbps) if mbps > 0.0 => {
                            result.upload_mbps = mbps;
                            TaskState::Done
                        }
                        outcome => {
                            tracing::warn!(
                                host = %server.host,
                                ?attempt,
                                error = %describe_failure(&outcome),
                                "upload test failed"
                            );
                            retry_of(attempt).map_or(TaskState::Done, TaskState::Upload)
                        }
                    }
                }

                TaskState::Done => break,
            };
        }

        result.refresh_completed();
        result
    }
}

fn describe_failure(outcome: &crate::error::Result<f64>) -> String {
    match outcome {
        Ok(v) => format!("non-positive throughput {}", v),
        // 即使是本应致命的错误 (如 IO), 在这里也只影响这一台服务器
        Err(e) if e.is_fatal() => format!("unexpected: {}", e),
        Err(e) => e.to_string(),
    }
}

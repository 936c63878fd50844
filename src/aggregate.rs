use crate::types::TestResult;
use std::cmp::Ordering;

/// Rank results by download throughput, best first.
///
/// Unmeasured results sort last. The sort is stable, so ties keep their
/// incoming order and the output depends only on the set of measurements.
pub fn aggregate(mut results: Vec<TestResult>) -> Vec<TestResult> {
    results.sort_by(|a, b| match (a.has_download(), b.has_download()) {
        (true, true) => b.download_mbps.total_cmp(&a.download_mbps),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    });

    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
        result.refresh_completed();
    }

    results
}

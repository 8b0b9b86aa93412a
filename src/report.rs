//! End-of-run summary printed by the binary.

use std::fmt::Write as _;
use std::time::Duration;

use gist_pipeline::RunReport;

#[must_use]
pub fn render(report: &RunReport, elapsed: Duration) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "run finished in {:.1}s", elapsed.as_secs_f64());
    let _ = writeln!(out, "  accepted    {}", report.accepted);
    let _ = writeln!(out, "  summarized  {}", report.counts.done);
    let _ = writeln!(out, "  empty       {}", report.counts.empty);
    let _ = write!(out, "  failed      {}", report.counts.failed);
    if let Some(fatal) = &report.fatal {
        let _ = write!(out, "\n  aborted: {fatal}");
    }
    out
}

//! Hand-off of ZAP's output from the temporary work dir to the results dir.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::automation::{PLAN_FILE, REPORTS_DIR};
use crate::error::ZapError;

pub fn run_dir_name(now: DateTime<Utc>) -> String {
    format!("DAST-{}-zap", now.format("%Y%m%d-%H%M%S"))
}

/// Copies the reports (and the plan that produced them) into
/// `<results_root>/<app_name>/DAST-<timestamp>-zap/`. Returns `None` when ZAP
/// left the report directory missing or empty.
pub fn collect_reports(
    work_dir: &Path,
    results_root: &Path,
    app_name: &str,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>, ZapError> {
    let reports = work_dir.join(REPORTS_DIR);
    if !reports.is_dir() || fs::read_dir(&reports)?.next().is_none() {
        warn!("ZAP produced no report in {}", reports.display());
        return Ok(None);
    }
    let dest = results_root.join(app_name).join(run_dir_name(now));
    fs::create_dir_all(&dest)?;
    let copied = copy_dir_recursive(&reports, &dest.join(REPORTS_DIR))?;
    let plan = work_dir.join(PLAN_FILE);
    if plan.is_file() {
        fs::copy(&plan, dest.join(PLAN_FILE))?;
    }
    info!("Copied {} report file(s) to {}", copied, dest.display());
    Ok(Some(dest))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            debug!("Copied {}", target.display());
            copied += 1;
        }
    }
    Ok(copied)
}

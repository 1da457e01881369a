//! Host resource heuristics for the Ajax spider.
//!
//! The Ajax spider drives a real browser, which needs a large `/dev/shm` and
//! spawns many threads. Constrained hosts (containers, CI runners) often
//! provide neither. These checks only warn; they never stop a scan.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ZapSettings;

pub const SHM_PATH: &str = "/dev/shm";
pub const PIDS_MAX_PATH: &str = "/sys/fs/cgroup/pids.max";
const CGROUP_SELF_PATH: &str = "/proc/self/cgroup";
pub const MIN_SHARED_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;
pub const MIN_PIDS: u64 = 10_000;

/// Host introspection used by the checks. Tests substitute a simulated host.
pub trait HostProbe {
    /// Whether the host exposes Linux style resource controls at all.
    fn has_resource_controls(&self) -> bool;
    fn shared_memory_total(&self) -> io::Result<u64>;
    /// First line of the cgroup v2 `pids.max` file.
    fn pids_max(&self) -> io::Result<String>;
}

pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn has_resource_controls(&self) -> bool {
        Path::new(CGROUP_SELF_PATH).exists()
    }

    fn shared_memory_total(&self) -> io::Result<u64> {
        filesystem_total_bytes(Path::new(SHM_PATH))
    }

    fn pids_max(&self) -> io::Result<String> {
        let content = fs::read_to_string(PIDS_MAX_PATH)?;
        Ok(content.lines().next().unwrap_or_default().trim_end().to_string())
    }
}

#[cfg(unix)]
fn filesystem_total_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::unnecessary_cast)]
    let total = stat.f_blocks as u64 * stat.f_frsize as u64;
    Ok(total)
}

#[cfg(not(unix))]
fn filesystem_total_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "shared memory size is only measured on unix hosts",
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceWarning {
    pub check: &'static str,
    pub message: String,
}

impl ResourceWarning {
    fn new(check: &'static str, message: String) -> Self {
        warn!("{}", message);
        Self { check, message }
    }
}

/// Runs the Ajax spider checks when the spider is configured.
pub fn check_for_settings(settings: &ZapSettings, probe: &dyn HostProbe) -> Vec<ResourceWarning> {
    if settings.spider_ajax.is_none() {
        return Vec::new();
    }
    check_ajax_resources(probe)
}

pub fn check_ajax_resources(probe: &dyn HostProbe) -> Vec<ResourceWarning> {
    if !probe.has_resource_controls() {
        debug!("Host exposes no resource controls, skipping Ajax spider resource checks");
        return Vec::new();
    }

    let mut warnings = Vec::new();
    match probe.shared_memory_total() {
        Ok(total) => {
            debug!("Shared mem size: {} bytes", total);
            if total <= MIN_SHARED_MEMORY_BYTES {
                warnings.push(ResourceWarning::new(
                    "shared_memory",
                    format!(
                        "Insufficient shared memory to run an Ajax Spider correctly ({total} bytes). \
                         Make sure that {SHM_PATH}/ is at least 1GB in size [ideally at least 2GB]"
                    ),
                ));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warnings.push(ResourceWarning::new(
                "shared_memory",
                format!("{SHM_PATH} not present. Unable to calculate shared memory size"),
            ));
        }
        Err(err) => {
            warnings.push(ResourceWarning::new(
                "shared_memory",
                format!("Unable to measure {SHM_PATH}: {err}"),
            ));
        }
    }

    // The browser uses a lot of threads; cgroup v2 caps them through pids.max.
    match probe.pids_max() {
        Ok(value) => {
            if let Some(warning) = evaluate_pids_max(&value) {
                warnings.push(warning);
            }
        }
        Err(err) => {
            // Root cgroup (unlimited) or no cgroup v2: assume the former.
            debug!("No cgroupv2 pids.max ({err}): assume root cgroup");
        }
    }
    warnings
}

fn evaluate_pids_max(value: &str) -> Option<ResourceWarning> {
    if value == "max" {
        debug!("cgroup v2 has no pid limit");
        return None;
    }
    match value.parse::<u64>() {
        Ok(limit) if limit > MIN_PIDS => {
            debug!("cgroup v2 has a sufficient pid limit: {limit}");
            None
        }
        Ok(limit) => Some(ResourceWarning::new(
            "pids_max",
            format!("Number of threads may be too low for SpiderAjax: cgroupv2 pids.max={limit}"),
        )),
        Err(err) => Some(ResourceWarning::new(
            "pids_max",
            format!("Unable to parse cgroupv2 pids.max '{value}': {err}"),
        )),
    }
}

//! ZAP addon maintenance: viability probe, remediation of a known broken
//! addon state, and the update/install pass requested by the configuration.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::command;
use crate::config::{ProxySettings, ZapSettings};
use crate::error::ZapError;
use crate::process::ProcessRunner;

pub const ADDON_STATE_FILE: &str = "add-ons-state.xml";
pub const MANDATORY_ADDON_MARKER: &str = "The mandatory add-on was not found:";
const RELEASES_URL: &str = "https://github.com/zaproxy/zap-extensions/releases/download";
/// `(release tag, file name)` of the addons ZAP refuses to start without.
const MANDATORY_ADDONS: [(&str, &str); 2] = [
    ("callhome-v0.6.0", "callhome-release-0.6.0.zap"),
    ("network-v0.9.0", "network-beta-0.9.0.zap"),
];

pub trait Downloader {
    /// Fetches `url` anonymously into `dest`, through `proxy` when given.
    fn download(&self, url: &str, dest: &Path, proxy: Option<&ProxySettings>)
        -> Result<(), ZapError>;
}

pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn download(
        &self,
        url: &str,
        dest: &Path,
        proxy: Option<&ProxySettings>,
    ) -> Result<(), ZapError> {
        debug!("Downloading {url}");
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }
        let client = builder.build()?;
        let response = client.get(url).header("User-Agent", "zap-local").send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ZapError::Download {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        let bytes = response.bytes()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &bytes)?;
        debug!("Saved {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddonRemediationPlan {
    pub tasks: Vec<DownloadTask>,
}

impl AddonRemediationPlan {
    pub fn mandatory_addons(plugin_dir: &Path) -> Self {
        let tasks = MANDATORY_ADDONS
            .iter()
            .map(|(tag, file)| DownloadTask {
                url: format!("{RELEASES_URL}/{tag}/{file}"),
                destination: plugin_dir.join(file),
            })
            .collect();
        Self { tasks }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Viability {
    Healthy,
    /// Mandatory addons were fetched and a reinstall ran with `install_status`.
    Repaired { install_status: i32 },
    Unresolved { status: i32 },
}

/// Removes the addon state file ZAP leaves behind. A missing file is expected.
pub fn remove_stale_state(host_home: &Path) -> Result<bool, ZapError> {
    let statefile = host_home.join(ADDON_STATE_FILE);
    match fs::remove_file(&statefile) {
        Ok(()) => {
            debug!("Removed addon state file {}", statefile.display());
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("The addon state file {} was not created", statefile.display());
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

pub struct AddonMaintenance<'a> {
    pub settings: &'a ZapSettings,
    pub runner: &'a dyn ProcessRunner,
    pub downloader: &'a dyn Downloader,
    pub env: &'a BTreeMap<String, String>,
    pub host_home: &'a Path,
    pub logical_home: &'a Path,
}

impl AddonMaintenance<'_> {
    /// Starts ZAP headless and, if it dies on a missing mandatory addon,
    /// downloads the addons and reinstalls everything once.
    pub fn check_viability(&self) -> Result<Viability, ZapError> {
        info!("Zap: verifying the viability of ZAP");
        let verify = command::verification_command(self.settings, self.logical_home);
        debug!("ZAP verification command: {:?}", verify.as_slice());
        let output = self.runner.run(&verify.to_argv(), self.env, true)?;

        if output.success() {
            debug!("ZAP appears to be in a correct state");
            return Ok(Viability::Healthy);
        }
        if !output.stderr_contains(MANDATORY_ADDON_MARKER) {
            warn!(
                "ZAP appears to be in an incorrect state (exit code {}). Error: {}",
                output.status_code,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            debug!(
                "ZAP verification output: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
            return Ok(Viability::Unresolved {
                status: output.status_code,
            });
        }

        info!("Missing mandatory plugins. Fixing");
        let plan = AddonRemediationPlan::mandatory_addons(&self.host_home.join("plugin"));
        for task in &plan.tasks {
            self.downloader
                .download(&task.url, &task.destination, self.settings.proxy.as_ref())?;
        }

        info!("Workaround: installing all addons");
        let install = command::install_all_addons_command(self.settings, self.logical_home);
        debug!("ZAP: installing all addons: {:?}", install.as_slice());
        let result = self.runner.run(&install.to_argv(), self.env, false)?;
        if !result.success() {
            warn!(
                "Reinstalling all addons failed with exit code {}; continuing with the scan",
                result.status_code
            );
        }
        Ok(Viability::Repaired {
            install_status: result.status_code,
        })
    }

    /// Runs a separate ZAP instance for addon updates and installs, because
    /// some addons need a restart before they can be used.
    pub fn update_addons(&self) -> Result<Option<i32>, ZapError> {
        let Some(update) = command::update_command(self.settings, self.logical_home) else {
            debug!("Skipping addon handling: no install, no update");
            return Ok(None);
        };
        let invocation = update.to_shell();
        debug!("Addons setup command: {invocation}");
        let result = self.runner.run(&invocation, self.env, false)?;
        if !result.success() {
            warn!(
                "ZAP did not handle the addon requirements correctly, and exited with code {}",
                result.status_code
            );
        }
        Ok(Some(result.status_code))
    }
}

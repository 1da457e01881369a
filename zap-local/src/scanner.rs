//! Lifecycle controller for ZAP running directly on the host.
//!
//! The caller drives four phases in order: [`ZapLocal::setup`],
//! [`ZapLocal::run`], [`ZapLocal::postprocess`] and [`ZapLocal::cleanup`].
//! Each phase checks the current [`ScannerState`] and the last phase entered
//! before doing anything, so a phase called out of order fails without side
//! effects.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::addons::{self, AddonMaintenance, Downloader, Viability};
use crate::automation::{AutomationPlan, PLAN_FILE, REPORTS_DIR};
use crate::command::{self, CommandLine};
use crate::config::{ConfigModel, HeaderValue, ZapSettings, DEFAULT_EXECUTABLE};
use crate::error::ZapError;
use crate::paths::PathMapping;
use crate::process::{classify_exit_code, ProcessRunner, ScanOutcome};
use crate::resources::{self, HostProbe, ResourceWarning};
use crate::results;
use crate::state::{Lifecycle, Phase, ScannerState};
use crate::workspace::{self, TempWorkspace};

pub const IDENT: &str = "zap";
const MAPPING_SCANNER: &str = "Zap";
pub const WORK_DIR: &str = "workdir";
pub const SCRIPTS_DIR: &str = "scripts";
pub const HOME_DIR: &str = "zaphomedir";

/// Host facilities the scanner relies on.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub runner: &'a dyn ProcessRunner,
    pub downloader: &'a dyn Downloader,
    pub probe: &'a dyn HostProbe,
}

pub struct ZapLocal<'a> {
    settings: ZapSettings,
    assets_dir: PathBuf,
    lifecycle: Lifecycle,
    workspace: TempWorkspace,
    path_map: PathMapping,
    /// Variables set for every ZAP child on top of the inherited environment.
    env: BTreeMap<String, String>,
    zap_cli: Option<CommandLine>,
    outcome: Option<ScanOutcome>,
    addon_viability: Option<Viability>,
    addon_update_status: Option<i32>,
    results_dir: Option<PathBuf>,
    resource_warnings: Vec<ResourceWarning>,
    host: Host<'a>,
}

impl<'a> ZapLocal<'a> {
    pub fn new(mut config: ConfigModel, assets_dir: &Path, host: Host<'a>) -> Result<Self, ZapError> {
        debug!("Initializing a local instance of the ZAP scanner");

        for section in ["proxy", "authentication"] {
            if let Some(value) = config.get(&format!("general.{section}")).cloned() {
                config.set(&format!("scanners.{IDENT}.{section}"), value, false);
            }
        }
        config.set(
            &format!("scanners.{IDENT}.container.parameters.executable"),
            DEFAULT_EXECUTABLE,
            false,
        );
        let settings = ZapSettings::from_config(&config, IDENT)?;

        // No container: every mapped path is the same on both sides. The tool
        // home is generated per run so the user's own ZAP setup is untouched.
        let mut workspace = TempWorkspace::new(IDENT);
        let work_dir = workspace.create(WORK_DIR)?;
        let home_dir = workspace.create(HOME_DIR)?;
        let scripts_dir = assets_dir.join(SCRIPTS_DIR);
        let path_map = PathMapping::for_scanner(
            MAPPING_SCANNER,
            [
                (WORK_DIR, work_dir.clone(), work_dir),
                (SCRIPTS_DIR, scripts_dir.clone(), scripts_dir),
                (HOME_DIR, home_dir.clone(), home_dir),
            ],
        );
        for entry in path_map.entries() {
            debug!(
                "{} mount '{}': {}",
                path_map.scanner(),
                entry.name,
                entry.host_path.display()
            );
        }

        Ok(Self {
            settings,
            assets_dir: assets_dir.to_path_buf(),
            lifecycle: Lifecycle::default(),
            workspace,
            path_map,
            env: BTreeMap::new(),
            zap_cli: None,
            outcome: None,
            addon_viability: None,
            addon_update_status: None,
            results_dir: None,
            resource_warnings: Vec::new(),
            host,
        })
    }

    pub fn state(&self) -> ScannerState {
        self.lifecycle.state()
    }

    /// Prepares the work dir, automation plan, command line and policies.
    pub fn setup(&mut self) -> Result<(), ZapError> {
        self.lifecycle.require("setup", &[ScannerState::Unconfigured])?;
        self.lifecycle.enter(Phase::Setup);
        info!("Preparing the ZAP scanner on the host");

        self.guarded(Self::prepare)?;
        self.lifecycle.advance(ScannerState::Ready);

        self.guarded(Self::create_home_if_needed)
    }

    /// Repairs addons when needed, then runs the scan to completion.
    pub fn run(&mut self) -> Result<ScanOutcome, ZapError> {
        self.lifecycle.require("run", &[ScannerState::Ready])?;
        self.lifecycle.enter(Phase::Run);
        info!("Running up the ZAP scanner on the host");
        self.guarded(Self::execute)
    }

    /// Collects the reports of the last run, whether it succeeded or not.
    /// Runs at most once, and only right after [`ZapLocal::run`].
    pub fn postprocess(&mut self) -> Result<Option<PathBuf>, ZapError> {
        self.lifecycle.require_after(
            "postprocess",
            Phase::Run,
            &[ScannerState::Done, ScannerState::Error],
        )?;
        self.lifecycle.enter(Phase::Postprocess);
        info!("Running postprocess for the ZAP Host environment");

        let work_dir = self.path_map.host_path(WORK_DIR)?.to_path_buf();
        let collected = self.guarded(|scanner| {
            results::collect_reports(
                &work_dir,
                &scanner.settings.results_dir,
                &scanner.settings.application_name,
                Utc::now(),
            )
        })?;
        self.results_dir = collected.clone();
        self.lifecycle.advance(ScannerState::Processed);
        Ok(collected)
    }

    /// Removes the temporary directories. Only allowed once the reports are
    /// collected, or when setup failed and nothing ran.
    pub fn cleanup(&mut self) -> Result<(), ZapError> {
        if !self.lifecycle.ready_for_cleanup() {
            return Err(ZapError::NotReady {
                state: self.lifecycle.state(),
            });
        }
        self.lifecycle.enter(Phase::Cleanup);
        info!("Running cleanup for the ZAP Host environment");

        debug!("Removing {} temporary directories", self.workspace.dirs().len());
        self.guarded(|scanner| scanner.workspace.remove_all())?;
        self.lifecycle.advance(ScannerState::CleanedUp);
        Ok(())
    }

    /// Drives every phase in order, still post-processing and cleaning up
    /// after a failure.
    pub fn scan(&mut self) -> ScanSummary {
        let mut first_error: Option<ZapError> = None;

        match self.setup() {
            Ok(()) => {
                if let Err(err) = self.run() {
                    first_error = Some(err);
                }
            }
            Err(err) => first_error = Some(err),
        }
        if let Some(err) = &first_error {
            error!("ZAP scan failed: {err}");
        }

        if self.lifecycle.last_phase() == Some(Phase::Run) {
            if let Err(err) = self.postprocess() {
                error!("Unable to collect ZAP results: {err}");
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.cleanup() {
            error!("Unable to clean up after ZAP: {err}");
            first_error.get_or_insert(err);
        }

        ScanSummary {
            state: self.state(),
            outcome: self.outcome,
            addon_viability: self.addon_viability,
            addon_update_status: self.addon_update_status,
            results_dir: self.results_dir.clone(),
            resource_warnings: self.resource_warnings.clone(),
            error: first_error.map(|err| err.to_string()),
        }
    }

    /// Runs `step`, moving the scanner to `Error` if it fails.
    fn guarded<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> Result<T, ZapError>,
    ) -> Result<T, ZapError> {
        let result = step(self);
        if result.is_err() {
            self.lifecycle.fail();
        }
        result
    }

    fn prepare(&mut self) -> Result<(), ZapError> {
        let host_work = self.path_map.host_path(WORK_DIR)?.to_path_buf();
        let work_dir = self.path_map.logical_path(WORK_DIR)?.to_path_buf();
        let home_dir = self.path_map.logical_path(HOME_DIR)?.to_path_buf();

        fs::create_dir_all(host_work.join("session_data"))?;
        fs::create_dir_all(host_work.join(REPORTS_DIR))?;

        self.resource_warnings = resources::check_for_settings(&self.settings, self.host.probe);
        let plan = AutomationPlan::build(&self.settings, &work_dir)?;
        plan.write(&host_work.join(PLAN_FILE))?;

        let cli = command::scan_command(&self.settings, &home_dir, &work_dir);
        debug!("ZAP will run with: {:?}", cli.as_slice());
        self.zap_cli = Some(cli);

        self.setup_authentication();

        if let Some(policy) = self.settings.active_scan_policy.clone() {
            let host_policies = self.path_map.host_path(HOME_DIR)?.join("policies");
            fs::create_dir(&host_policies)?;
            self.include_file(
                &self.assets_dir.join("policies").join(format!("{policy}.policy")),
                &home_dir.join("policies").join(format!("{policy}.policy")),
            )?;
        }
        Ok(())
    }

    fn execute(&mut self) -> Result<ScanOutcome, ZapError> {
        let host_home = self.path_map.host_path(HOME_DIR)?.to_path_buf();
        let logical_home = self.path_map.logical_path(HOME_DIR)?.to_path_buf();
        {
            let maintenance = AddonMaintenance {
                settings: &self.settings,
                runner: self.host.runner,
                downloader: self.host.downloader,
                env: &self.env,
                host_home: &host_home,
                logical_home: &logical_home,
            };
            let viability = maintenance.check_viability()?;
            info!("ZAP viability: {viability:?}");
            self.addon_viability = Some(viability);

            // ZAP may leave a stale addon state behind that breaks the next
            // start, and the addon pass can write it again.
            addons::remove_stale_state(&host_home)?;
            self.addon_update_status = maintenance.update_addons()?;
            addons::remove_stale_state(&host_home)?;
        }

        let invocation = self
            .zap_cli
            .as_ref()
            .ok_or_else(|| ZapError::Process("the ZAP command line was never built".to_string()))?
            .to_shell();
        info!("Running ZAP with the following command:\n{invocation}");
        let output = self.host.runner.run(&invocation, &self.env, false)?;
        debug!("ZAP returned {:?}", output.status_code);

        let outcome = classify_exit_code(output.status_code);
        self.outcome = Some(outcome);
        if outcome.is_success() {
            info!(
                "The ZAP process finished with no errors, and exited with code {}",
                output.status_code
            );
            self.lifecycle.advance(ScannerState::Done);
        } else {
            warn!(
                "The ZAP process did not finish correctly, and exited with code {}",
                output.status_code
            );
            self.lifecycle.fail();
        }
        Ok(outcome)
    }

    /// Copies a host file to `dest` as seen by ZAP.
    fn include_file(&self, host_path: &Path, dest: &Path) -> Result<(), ZapError> {
        let dest_host = self.path_map.logical_to_host(dest).ok_or_else(|| {
            ZapError::Config(format!("{} is outside every mapped directory", dest.display()))
        })?;
        if !host_path.is_file() {
            return Err(ZapError::Config(format!(
                "file to include not found: {}",
                host_path.display()
            )));
        }
        fs::copy(host_path, &dest_host)?;
        debug!("Copied {} to {}", host_path.display(), dest_host.display());
        Ok(())
    }

    /// Sets `key` for ZAP. `None` means the value is inherited from the host
    /// environment as-is.
    fn add_env(&mut self, key: &str, value: Option<String>) {
        if let Some(value) = value {
            self.env.insert(key.to_string(), value);
        }
    }

    fn setup_authentication(&mut self) {
        let Some(auth) = self.settings.authentication.clone() else {
            return;
        };
        self.add_env("ZAP_AUTH_HEADER", Some(auth.name));
        let value = match auth.value {
            HeaderValue::Literal(value) => Some(value),
            HeaderValue::FromHost(var) if var == "ZAP_AUTH_HEADER_VALUE" => None,
            HeaderValue::FromHost(var) => match env::var(&var) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Authentication variable {var} is not set; the header will be empty");
                    None
                }
            },
        };
        self.add_env("ZAP_AUTH_HEADER_VALUE", value);
    }

    /// The Ajax spider's browser needs a writable HOME. Some hosts (OpenShift
    /// among them) run with a read-only one.
    fn create_home_if_needed(&mut self) -> Result<(), ZapError> {
        let current = self
            .env
            .get("HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(PathBuf::from));
        if let Some(home) = workspace::writable_home(current.as_deref(), &mut self.workspace)? {
            debug!("Replaced HOME directory, to {}", home.display());
            self.add_env("HOME", Some(home.to_string_lossy().to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub state: ScannerState,
    pub outcome: Option<ScanOutcome>,
    pub addon_viability: Option<Viability>,
    pub addon_update_status: Option<i32>,
    pub results_dir: Option<PathBuf>,
    pub resource_warnings: Vec<ResourceWarning>,
    pub error: Option<String>,
}

impl ScanSummary {
    pub fn ok(&self) -> bool {
        self.state != ScannerState::Error && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addons::tests::{MockDownloader, MockRunner};
    use crate::addons::ADDON_STATE_FILE;
    use crate::process::{CommandOutput, Invocation};
    use crate::resources::tests::FakeHost;
    use std::cell::RefCell;
    use std::io;
    use tempfile::{tempdir, TempDir};

    impl ZapLocal<'_> {
        fn path_map(&self) -> &PathMapping {
            &self.path_map
        }

        fn env_overrides(&self) -> &BTreeMap<String, String> {
            &self.env
        }

        fn zap_cli(&self) -> Option<&CommandLine> {
            self.zap_cli.as_ref()
        }

        fn outcome(&self) -> Option<ScanOutcome> {
            self.outcome
        }

        fn resource_warnings(&self) -> &[ResourceWarning] {
            &self.resource_warnings
        }

        fn temp_dirs(&self) -> &[PathBuf] {
            self.workspace.dirs()
        }
    }

    const HEALTHY_HOST: FakeHost = FakeHost {
        controls: true,
        shm: Some(8 * 1024 * 1024 * 1024),
        pids: Some("max"),
    };

    struct Fixture {
        assets: TempDir,
        results: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let assets = tempdir().unwrap();
            fs::create_dir_all(assets.path().join("policies")).unwrap();
            fs::create_dir_all(assets.path().join("scripts")).unwrap();
            fs::write(
                assets.path().join("policies/API-scan-minimal.policy"),
                "<configuration><policy>API-scan-minimal</policy></configuration>\n",
            )
            .unwrap();
            Self {
                assets,
                results: tempdir().unwrap(),
            }
        }

        fn config(&self, extra: &str) -> ConfigModel {
            let yaml = format!(
                "config:\n  configVersion: 5\n  results_dir: {}\napplication:\n  shortName: petstore\n  url: https://example.com\n{}",
                self.results.path().display(),
                extra
            );
            ConfigModel::from_yaml_str(&yaml).unwrap()
        }

        fn scanner<'a>(&self, extra: &str, host: Host<'a>) -> ZapLocal<'a> {
            ZapLocal::new(self.config(extra), self.assets.path(), host).unwrap()
        }
    }

    fn host<'a>(
        runner: &'a dyn ProcessRunner,
        downloader: &'a MockDownloader,
        probe: &'a FakeHost,
    ) -> Host<'a> {
        Host {
            runner,
            downloader,
            probe,
        }
    }

    fn finish(scanner: &mut ZapLocal<'_>) {
        scanner.postprocess().unwrap();
        scanner.cleanup().unwrap();
    }

    #[test]
    fn run_before_setup_is_rejected_without_running_anything() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        let err = scanner.run().expect_err("run before setup");
        assert!(matches!(err, ZapError::OutOfSequence { phase: "run", .. }));
        assert!(runner.calls().is_empty());
        assert_eq!(scanner.state(), ScannerState::Unconfigured);

        scanner.setup().unwrap();
        let err = scanner.setup().expect_err("setup twice");
        assert!(matches!(err, ZapError::OutOfSequence { phase: "setup", .. }));
        assert_eq!(scanner.state(), ScannerState::Ready);
    }

    #[test]
    fn cleanup_before_postprocess_is_rejected() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        scanner.setup().unwrap();
        scanner.run().unwrap();
        assert_eq!(scanner.state(), ScannerState::Done);

        let err = scanner.cleanup().expect_err("cleanup before postprocess");
        assert!(matches!(err, ZapError::NotReady { state: ScannerState::Done }));
        assert!(scanner.temp_dirs().iter().all(|dir| dir.exists()));
        finish(&mut scanner);
    }

    #[test]
    fn failed_run_still_requires_postprocess_before_cleanup() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        runner.push_status(0, "");
        runner.push_status(1, "");
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        scanner.setup().unwrap();
        assert_eq!(scanner.run().unwrap(), ScanOutcome::Failure(1));
        assert_eq!(scanner.state(), ScannerState::Error);

        let err = scanner.cleanup().expect_err("cleanup before postprocess");
        assert!(matches!(err, ZapError::NotReady { state: ScannerState::Error }));
        let dirs = scanner.temp_dirs().to_vec();
        assert!(dirs.iter().all(|dir| dir.exists()));

        scanner.postprocess().unwrap();
        let err = scanner.postprocess().expect_err("postprocess twice");
        assert!(matches!(err, ZapError::OutOfSequence { phase: "postprocess", .. }));

        scanner.cleanup().unwrap();
        assert!(dirs.iter().all(|dir| !dir.exists()));
        assert_eq!(scanner.state(), ScannerState::Error);
    }

    #[test]
    fn successful_lifecycle() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        scanner.setup().unwrap();
        assert_eq!(scanner.state(), ScannerState::Ready);
        let work = scanner.path_map().host_path(WORK_DIR).unwrap().to_path_buf();
        assert!(work.join(PLAN_FILE).is_file());
        assert!(work.join("session_data").is_dir());

        assert_eq!(scanner.run().unwrap(), ScanOutcome::Success);
        assert_eq!(scanner.state(), ScannerState::Done);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].capture_output);
        assert!(matches!(calls[0].invocation, Invocation::Argv(_)));
        match &calls[1].invocation {
            Invocation::Shell(script) => {
                assert!(script.starts_with("zap.sh -dir "));
                assert!(script.contains("-autorun"));
            }
            other => panic!("expected a shell invocation, got {other:?}"),
        }
        assert!(downloader.downloads.borrow().is_empty());

        scanner.postprocess().unwrap();
        assert_eq!(scanner.state(), ScannerState::Processed);
        let dirs = scanner.temp_dirs().to_vec();
        scanner.cleanup().unwrap();
        assert_eq!(scanner.state(), ScannerState::CleanedUp);
        assert!(dirs.iter().all(|dir| !dir.exists()));
    }

    #[test]
    fn exit_codes_drive_the_final_state() {
        for (code, expected) in [
            (0, ScannerState::Done),
            (2, ScannerState::Done),
            (1, ScannerState::Error),
            (3, ScannerState::Error),
            (137, ScannerState::Error),
        ] {
            let fixture = Fixture::new();
            let runner = MockRunner::default();
            runner.push_status(0, "");
            runner.push_status(code, "");
            let downloader = MockDownloader::default();
            let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

            scanner.setup().unwrap();
            let outcome = scanner.run().unwrap();
            assert_eq!(outcome, classify_exit_code(code));
            assert_eq!(scanner.state(), expected, "exit code {code}");

            scanner.postprocess().unwrap();
            let dirs = scanner.temp_dirs().to_vec();
            scanner.cleanup().unwrap();
            assert!(dirs.iter().all(|dir| !dir.exists()));
            let final_state = if expected == ScannerState::Error {
                ScannerState::Error
            } else {
                ScannerState::CleanedUp
            };
            assert_eq!(scanner.state(), final_state);
        }
    }

    #[test]
    fn active_scan_copies_the_policy_into_the_tool_home() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner(
            "scanners:\n  zap:\n    activeScan:\n",
            host(&runner, &downloader, &HEALTHY_HOST),
        );

        scanner.setup().unwrap();
        let home = scanner.path_map().host_path(HOME_DIR).unwrap();
        let copied = fs::read_to_string(home.join("policies/API-scan-minimal.policy")).unwrap();
        assert!(copied.contains("API-scan-minimal"));
        scanner.run().unwrap();
        finish(&mut scanner);
    }

    #[test]
    fn missing_policy_fails_setup() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner(
            "scanners:\n  zap:\n    activeScan:\n      policy: Nope\n",
            host(&runner, &downloader, &HEALTHY_HOST),
        );

        let err = scanner.setup().expect_err("missing policy");
        assert!(err.to_string().contains("Nope.policy"));
        assert_eq!(scanner.state(), ScannerState::Error);
        let err = scanner.run().expect_err("not ready");
        assert!(matches!(err, ZapError::OutOfSequence { phase: "run", .. }));

        let err = scanner.postprocess().expect_err("nothing ran");
        assert!(matches!(err, ZapError::OutOfSequence { phase: "postprocess", .. }));
        let dirs = scanner.temp_dirs().to_vec();
        scanner.cleanup().unwrap();
        assert!(dirs.iter().all(|dir| !dir.exists()));
        assert_eq!(scanner.state(), ScannerState::Error);
        assert!(runner.calls().is_empty());
    }

    /// Writes the addon state file whenever ZAP is started for the addon pass.
    struct StateWritingRunner {
        home: RefCell<Option<PathBuf>>,
        inner: MockRunner,
    }

    impl ProcessRunner for StateWritingRunner {
        fn run(
            &self,
            invocation: &Invocation,
            env_overrides: &BTreeMap<String, String>,
            capture_output: bool,
        ) -> Result<CommandOutput, io::Error> {
            if let (Invocation::Shell(script), Some(home)) = (invocation, &*self.home.borrow()) {
                if script.contains("-autorun") {
                    assert!(!home.join(ADDON_STATE_FILE).exists());
                } else {
                    fs::write(home.join(ADDON_STATE_FILE), "<addons/>")?;
                }
            }
            self.inner.run(invocation, env_overrides, capture_output)
        }
    }

    #[test]
    fn stale_addon_state_is_removed_around_the_addon_pass() {
        let fixture = Fixture::new();
        let runner = StateWritingRunner {
            home: RefCell::new(None),
            inner: MockRunner::default(),
        };
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner(
            "scanners:\n  zap:\n    miscOptions:\n      updateAddons: true\n",
            host(&runner, &downloader, &HEALTHY_HOST),
        );
        let home = scanner.path_map().host_path(HOME_DIR).unwrap().to_path_buf();
        *runner.home.borrow_mut() = Some(home.clone());
        fs::write(home.join(ADDON_STATE_FILE), "<addons/>").unwrap();

        scanner.setup().unwrap();
        scanner.run().unwrap();
        assert!(!home.join(ADDON_STATE_FILE).exists());

        let calls = runner.inner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].mentions("-addonupdate"));
        assert!(calls[2].mentions("-autorun"));
        finish(&mut scanner);
    }

    #[test]
    fn mandatory_addon_failure_is_repaired_before_the_scan() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        runner.push_status(1, "The mandatory add-on was not found: callhome");
        runner.push_status(0, "");
        runner.push_status(0, "");
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        scanner.setup().unwrap();
        assert_eq!(scanner.run().unwrap(), ScanOutcome::Success);

        let home = scanner.path_map().host_path(HOME_DIR).unwrap().to_path_buf();
        let downloads = downloader.downloads.borrow().clone();
        assert_eq!(downloads.len(), 2);
        assert!(downloads
            .iter()
            .all(|(_, dest)| dest.starts_with(home.join("plugin"))));
        let calls = runner.calls();
        assert_eq!(
            calls
                .iter()
                .filter(|call| call.mentions("-addoninstallall"))
                .count(),
            1
        );
        assert_eq!(
            scanner.addon_viability,
            Some(Viability::Repaired { install_status: 0 })
        );
        assert_eq!(scanner.addon_update_status, None);
        finish(&mut scanner);
    }

    #[test]
    fn download_failure_aborts_the_run() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        runner.push_status(1, "The mandatory add-on was not found: callhome");
        let downloader = MockDownloader {
            fail: true,
            ..Default::default()
        };
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        scanner.setup().unwrap();
        let err = scanner.run().expect_err("download failure");
        assert!(matches!(err, ZapError::Download { .. }));
        assert_eq!(scanner.state(), ScannerState::Error);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(scanner.outcome(), None);

        scanner.postprocess().unwrap();
        scanner.cleanup().unwrap();
        assert_eq!(scanner.state(), ScannerState::Error);
    }

    #[test]
    fn ajax_spider_on_a_small_host_only_warns() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let small = FakeHost {
            controls: true,
            shm: Some(64 * 1024 * 1024),
            pids: None,
        };
        let mut scanner = fixture.scanner(
            "scanners:\n  zap:\n    spiderAjax:\n      maxDuration: 10\n",
            host(&runner, &downloader, &small),
        );

        scanner.setup().unwrap();
        assert_eq!(scanner.resource_warnings().len(), 1);
        assert_eq!(scanner.state(), ScannerState::Ready);
        scanner.run().unwrap();
        finish(&mut scanner);
    }

    #[test]
    fn host_mapping_is_identity_and_complete() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        for entry in scanner.path_map().entries() {
            assert_eq!(entry.host_path, entry.logical_path);
        }
        for name in [WORK_DIR, SCRIPTS_DIR, HOME_DIR] {
            assert!(scanner.path_map().host_path(name).is_ok());
        }
        assert_eq!(
            scanner.path_map().host_path(SCRIPTS_DIR).unwrap(),
            fixture.assets.path().join("scripts")
        );
        scanner.setup().unwrap();
        scanner.run().unwrap();
        finish(&mut scanner);
    }

    #[test]
    fn general_proxy_reaches_the_command_line() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner(
            "general:\n  proxy:\n    proxyHost: squid.local\n    proxyPort: 3128\n",
            host(&runner, &downloader, &HEALTHY_HOST),
        );

        scanner.setup().unwrap();
        assert!(scanner
            .zap_cli()
            .unwrap()
            .contains("network.connection.httpProxy.host=squid.local"));
        scanner.run().unwrap();
        finish(&mut scanner);
    }

    #[test]
    fn authentication_header_goes_through_the_env_map() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner(
            "general:\n  authentication:\n    type: http_header\n    parameters:\n      name: X-Api-Key\n      value: s3cr3t\n",
            host(&runner, &downloader, &HEALTHY_HOST),
        );

        scanner.setup().unwrap();
        scanner.run().unwrap();
        for call in runner.calls() {
            assert_eq!(
                call.env_overrides.get("ZAP_AUTH_HEADER").map(String::as_str),
                Some("X-Api-Key")
            );
            assert_eq!(
                call.env_overrides
                    .get("ZAP_AUTH_HEADER_VALUE")
                    .map(String::as_str),
                Some("s3cr3t")
            );
        }
        finish(&mut scanner);
    }

    #[test]
    fn unwritable_home_is_replaced() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));
        let missing = fixture.results.path().join("no-such-home");
        scanner.add_env("HOME", Some(missing.to_string_lossy().to_string()));
        scanner.add_env("UNCHANGED", None);

        scanner.setup().unwrap();
        let home = PathBuf::from(scanner.env_overrides().get("HOME").unwrap());
        assert_ne!(home, missing);
        assert!(workspace::dir_writable(&home));
        assert!(!scanner.env_overrides().contains_key("UNCHANGED"));
        assert_eq!(scanner.temp_dirs().len(), 3);

        scanner.run().unwrap();
        finish(&mut scanner);
        assert!(!home.exists());
    }

    #[test]
    fn scan_summary_reports_failures() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        runner.push_status(0, "");
        runner.push_status(1, "");
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        let summary = scanner.scan();
        assert!(!summary.ok());
        assert_eq!(summary.state, ScannerState::Error);
        assert_eq!(summary.outcome, Some(ScanOutcome::Failure(1)));
        assert_eq!(summary.addon_viability, Some(Viability::Healthy));
        assert!(summary.error.is_none());
        assert!(scanner.temp_dirs().is_empty());
    }

    #[test]
    fn scan_summary_on_success() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner("", host(&runner, &downloader, &HEALTHY_HOST));

        let summary = scanner.scan();
        assert!(summary.ok());
        assert_eq!(summary.state, ScannerState::CleanedUp);
        assert_eq!(summary.outcome, Some(ScanOutcome::Success));
        assert_eq!(summary.addon_viability, Some(Viability::Healthy));
        assert_eq!(summary.addon_update_status, None);
        assert_eq!(summary.results_dir, None);
    }

    #[test]
    fn scan_summary_after_failed_setup_skips_postprocess() {
        let fixture = Fixture::new();
        let runner = MockRunner::default();
        let downloader = MockDownloader::default();
        let mut scanner = fixture.scanner(
            "scanners:\n  zap:\n    activeScan:\n      policy: Nope\n",
            host(&runner, &downloader, &HEALTHY_HOST),
        );

        let summary = scanner.scan();
        assert!(!summary.ok());
        assert_eq!(summary.state, ScannerState::Error);
        assert_eq!(summary.outcome, None);
        assert_eq!(summary.addon_viability, None);
        assert!(summary.error.unwrap().contains("Nope.policy"));
        assert!(scanner.temp_dirs().is_empty());
        assert!(runner.calls().is_empty());
    }
}

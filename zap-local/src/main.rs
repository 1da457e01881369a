use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod addons;
mod automation;
mod command;
mod config;
mod error;
mod paths;
mod process;
mod resources;
mod results;
mod scanner;
mod state;
mod workspace;

use crate::addons::HttpDownloader;
use crate::config::{ConfigModel, ZapSettings, DEFAULT_EXECUTABLE};
use crate::error::ZapError;
use crate::process::SystemRunner;
use crate::resources::SystemProbe;
use crate::scanner::{Host, ZapLocal, IDENT};

const BUNDLED_ASSETS_DIR: &str = env!("CARGO_MANIFEST_DIR");

#[derive(Parser, Debug)]
#[command(
    name = "zap-local",
    version,
    about = "Run the ZAP scanner directly on this host"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(long, global = true, hide = true)]
    assets_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up, run, collect and clean up one ZAP scan.
    Scan,
    /// Check that this host can run ZAP scans.
    Doctor {
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Context {
    config_path: PathBuf,
    assets_dir: PathBuf,
    json: bool,
}

fn main() -> Result<(), ZapError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let ctx = build_context(&cli);

    let result = match cli.command {
        Commands::Scan => handle_scan(&ctx),
        Commands::Doctor { strict } => handle_doctor(&ctx, strict),
    };

    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(err) => {
            if ctx.json {
                let payload = JsonResult::<serde_json::Value> {
                    ok: false,
                    result: None,
                    error: Some(err.to_string()),
                };
                print_json(&payload)?;
            } else {
                eprintln!("{err}");
            }
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn build_context(cli: &Cli) -> Context {
    Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        assets_dir: resolve_assets_dir(cli.assets_dir.as_ref()),
        json: cli.json,
    }
}

fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("ZAP_LOCAL_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    PathBuf::from("config.yaml")
}

/// Directory next to the (possibly symlinked) executable that ships `policies/`.
fn assets_dir_from_exe_path(exe: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(parent) = exe.parent() {
        candidates.push(parent.to_path_buf());
    }
    if let Ok(canonical_exe) = fs::canonicalize(exe) {
        if let Some(parent) = canonical_exe.parent() {
            if !candidates.iter().any(|existing| existing == parent) {
                candidates.push(parent.to_path_buf());
            }
        }
    }
    candidates
        .into_iter()
        .find(|candidate| candidate.join("policies").is_dir())
}

fn resolve_assets_dir(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("ZAP_LOCAL_ASSETS_DIR") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(candidate) = assets_dir_from_exe_path(&exe) {
            return candidate;
        }
    }
    PathBuf::from(BUNDLED_ASSETS_DIR)
}

fn handle_scan(ctx: &Context) -> Result<bool, ZapError> {
    let config = ConfigModel::read(&ctx.config_path)?;
    debug!("Using assets from {}", ctx.assets_dir.display());

    // JSON mode owns stdout, so ZAP's console output goes to stderr.
    let runner = SystemRunner {
        stdout_to_stderr: ctx.json,
    };
    let downloader = HttpDownloader;
    let probe = SystemProbe;
    let host = Host {
        runner: &runner,
        downloader: &downloader,
        probe: &probe,
    };
    let mut scanner = ZapLocal::new(config, &ctx.assets_dir, host)?;
    let summary = scanner.scan();
    let ok = summary.ok();

    if ctx.json {
        let error = summary.error.clone().or_else(|| {
            (!ok).then(|| format!("ZAP scan ended in state {}", summary.state))
        });
        print_json(&JsonResult {
            ok,
            result: Some(&summary),
            error,
        })?;
        return Ok(ok);
    }

    println!("state: {}", summary.state);
    if let Some(outcome) = summary.outcome {
        println!("outcome: {outcome}");
    }
    match &summary.results_dir {
        Some(dir) => println!("results: {}", dir.display()),
        None => println!("results: none"),
    }
    if let Some(code) = summary.addon_update_status {
        println!("addon update: exit code {code}");
    }
    for warning in &summary.resource_warnings {
        println!("warning: {}", warning.message);
    }
    if let Some(error) = &summary.error {
        eprintln!("{error}");
    }
    Ok(ok)
}

#[derive(Debug, Clone, Serialize)]
struct DoctorCheck {
    id: String,
    ok: bool,
    severity: String,
    strict_fail: bool,
    message: String,
    remediation: String,
    details: serde_json::Value,
}

fn doctor_check(
    id: &str,
    ok: bool,
    severity: &str,
    strict_fail: bool,
    message: impl Into<String>,
    remediation: impl Into<String>,
    details: serde_json::Value,
) -> DoctorCheck {
    DoctorCheck {
        id: id.to_string(),
        ok,
        severity: severity.to_string(),
        strict_fail,
        message: message.into(),
        remediation: remediation.into(),
        details,
    }
}

fn collect_doctor_checks(ctx: &Context) -> Result<Vec<DoctorCheck>, ZapError> {
    let mut checks = Vec::new();

    let config_exists = ctx.config_path.is_file();
    let config = if config_exists {
        ConfigModel::read(&ctx.config_path)?
    } else {
        ConfigModel::default()
    };
    checks.push(doctor_check(
        "config",
        config_exists,
        "warning",
        true,
        if config_exists {
            format!("configuration found at {}", ctx.config_path.display())
        } else {
            format!("no configuration at {}", ctx.config_path.display())
        },
        "Pass --config or set ZAP_LOCAL_CONFIG to a YAML configuration.",
        json!({"config_path": ctx.config_path}),
    ));

    let settings = ZapSettings::from_config(&config, IDENT)?;
    let executable = which::which(&settings.executable);
    checks.push(doctor_check(
        "zap_executable",
        executable.is_ok(),
        "error",
        true,
        match &executable {
            Ok(path) => format!("ZAP found at {}", path.display()),
            Err(_) => format!("{} is not installed or not in PATH", settings.executable),
        },
        format!(
            "Install ZAP and put {DEFAULT_EXECUTABLE} on PATH, or set scanners.zap.container.parameters.executable."
        ),
        json!({
            "executable": settings.executable,
            "resolved": executable.as_ref().ok(),
        }),
    ));

    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir);
    let home_ok = home.as_deref().is_some_and(workspace::dir_writable);
    checks.push(doctor_check(
        "home_writable",
        home_ok,
        "warning",
        false,
        if home_ok {
            "HOME is writable"
        } else {
            "HOME is missing or read-only"
        },
        "A temporary HOME will be created for each scan.",
        json!({"home": home}),
    ));

    let policies = ctx.assets_dir.join("policies");
    let policies_ok = policies.is_dir();
    checks.push(doctor_check(
        "assets",
        policies_ok,
        "error",
        true,
        if policies_ok {
            format!("scan policies found in {}", policies.display())
        } else {
            format!("no scan policies in {}", policies.display())
        },
        "Pass --assets-dir or set ZAP_LOCAL_ASSETS_DIR to the directory holding policies/.",
        json!({"assets_dir": ctx.assets_dir}),
    ));

    let warnings = resources::check_ajax_resources(&SystemProbe);
    checks.push(doctor_check(
        "ajax_resources",
        warnings.is_empty(),
        "warning",
        false,
        if warnings.is_empty() {
            "host resources are sufficient for the Ajax spider".to_string()
        } else {
            warnings
                .iter()
                .map(|warning| warning.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        },
        "Give /dev/shm at least 1GB and raise the cgroup pids limit above 10000.",
        json!({"warnings": warnings}),
    ));

    Ok(checks)
}

fn handle_doctor(ctx: &Context, strict: bool) -> Result<bool, ZapError> {
    let checks = collect_doctor_checks(ctx)?;
    let has_error = checks
        .iter()
        .any(|check| !check.ok && check.severity == "error");
    let has_strict_warning = checks.iter().any(|check| !check.ok && check.strict_fail);
    let ok = !has_error && (!strict || !has_strict_warning);
    let primary_error = checks
        .iter()
        .find(|check| !check.ok && check.severity == "error")
        .or_else(|| {
            checks
                .iter()
                .find(|check| !check.ok && strict && check.strict_fail)
        })
        .map(|check| check.message.clone());

    if ctx.json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks, "strict": strict })),
            error: if ok { None } else { primary_error },
        };
        print_json(&payload)?;
        return Ok(ok);
    }

    for check in &checks {
        let state = if check.ok { "ok" } else { "fail" };
        println!(
            "[{}] {} ({}) - {}",
            state, check.id, check.severity, check.message
        );
        if !check.ok {
            println!("  remediation: {}", check.remediation);
        }
    }
    if !ok {
        eprintln!(
            "{}",
            primary_error.unwrap_or_else(|| "one or more readiness checks failed".to_string())
        );
    }
    Ok(ok)
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), ZapError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

//! ZAP command line construction.
//!
//! Every invocation starts with the executable and `-dir <home>`, then the
//! options shared by all modes, then a mode specific tail. ZAP's own parser
//! lets later flags override earlier ones, so the order is fixed.

use std::borrow::Cow;
use std::path::Path;

use crate::config::ZapSettings;
use crate::process::Invocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(executable: &str, home_dir: &Path) -> Self {
        Self {
            args: vec![
                executable.to_string(),
                "-dir".to_string(),
                home_dir.to_string_lossy().to_string(),
            ],
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    #[cfg(test)]
    pub fn contains(&self, arg: &str) -> bool {
        self.args.iter().any(|item| item == arg)
    }

    /// Single string safe to hand to `sh -c`.
    pub fn to_shell_string(&self) -> String {
        shell_join(&self.args)
    }

    pub fn to_argv(&self) -> Invocation {
        Invocation::Argv(self.args.clone())
    }

    pub fn to_shell(&self) -> Invocation {
        Invocation::Shell(self.to_shell_string())
    }
}

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| shell_escape::unix::escape(Cow::from(arg.as_str())).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Options passed to every ZAP invocation, whatever the mode.
pub fn standard_options(settings: &ZapSettings) -> Vec<String> {
    let mut options = Vec::new();
    // The automation framework cannot configure the upstream proxy.
    match &settings.proxy {
        Some(proxy) => {
            options.extend([
                "-config".to_string(),
                format!("network.connection.httpProxy.host={}", proxy.proxy_host),
                "-config".to_string(),
                format!("network.connection.httpProxy.port={}", proxy.proxy_port),
                "-config".to_string(),
                "network.connection.httpProxy.enabled=true".to_string(),
            ]);
        }
        None => {
            options.extend([
                "-config".to_string(),
                "network.connection.httpProxy.enabled=false".to_string(),
            ]);
        }
    }
    options.extend([
        "-port".to_string(),
        settings.zap_port.to_string(),
        "-config".to_string(),
        format!("network.localServers.mainProxy.port={}", settings.zap_port),
        "-config".to_string(),
        "database.newsession=3".to_string(),
        "-config".to_string(),
        "database.newsessionprompt=false".to_string(),
        "-config".to_string(),
        "start.checkForUpdates=false".to_string(),
    ]);
    options
}

/// The real scan: new session in the work dir, then run the automation plan.
pub fn scan_command(settings: &ZapSettings, home_dir: &Path, work_dir: &Path) -> CommandLine {
    let mut cli = CommandLine::new(&settings.executable, home_dir);
    cli.args(standard_options(settings));
    cli.args([
        "-newsession".to_string(),
        work_dir
            .join("session_data")
            .join("session")
            .to_string_lossy()
            .to_string(),
    ]);
    if !settings.enable_ui {
        cli.arg("-cmd");
    }
    cli.args([
        "-autorun".to_string(),
        work_dir.join("af.yaml").to_string_lossy().to_string(),
    ]);
    cli
}

/// Headless start that exits immediately, used to probe the addon state.
pub fn verification_command(settings: &ZapSettings, home_dir: &Path) -> CommandLine {
    let mut cli = CommandLine::new(&settings.executable, home_dir);
    cli.args(standard_options(settings));
    cli.arg("-cmd");
    cli
}

pub fn install_all_addons_command(settings: &ZapSettings, home_dir: &Path) -> CommandLine {
    let mut cli = verification_command(settings, home_dir);
    cli.arg("-addoninstallall");
    cli
}

/// Addon update/install pass, or `None` when nothing was requested.
pub fn update_command(settings: &ZapSettings, home_dir: &Path) -> Option<CommandLine> {
    if !settings.update_addons && settings.additional_addons.is_empty() {
        return None;
    }
    let mut cli = CommandLine::new(&settings.executable, home_dir);
    if settings.update_addons {
        cli.arg("-addonupdate");
    }
    for addon in &settings.additional_addons {
        cli.args(["-addoninstall", addon.as_str()]);
    }
    cli.arg("-cmd");
    Some(cli)
}

//! ZAP Automation Framework plan (`af.yaml`) driven by `-autorun`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_yaml::Value;
use tracing::debug;

use crate::config::ZapSettings;
use crate::error::ZapError;

pub const PLAN_FILE: &str = "af.yaml";
pub const REPORTS_DIR: &str = "reports";
const CONTEXT_NAME: &str = "Default Context";

#[derive(Debug, Clone, Serialize)]
pub struct AutomationPlan {
    pub env: PlanEnv,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanEnv {
    pub contexts: Vec<PlanContext>,
    pub parameters: EnvParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanContext {
    pub name: String,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvParameters {
    pub fail_on_error: bool,
    pub fail_on_warning: bool,
    pub progress_to_stdout: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    #[serde(rename = "type")]
    pub kind: String,
    pub parameters: BTreeMap<String, Value>,
}

impl Job {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

impl AutomationPlan {
    /// Builds the plan for `settings`; `work_dir` is the tool-side work directory.
    pub fn build(settings: &ZapSettings, work_dir: &Path) -> Result<Self, ZapError> {
        let app_url = settings.application_url.clone().ok_or_else(|| {
            ZapError::Config("application.url is required to build a scan plan".to_string())
        })?;

        let mut jobs = Vec::new();
        if let Some(spider) = &settings.spider {
            jobs.push(
                Job::new("spider")
                    .param("context", CONTEXT_NAME)
                    .param("url", spider.url.clone().unwrap_or_else(|| app_url.clone()))
                    .param("maxDuration", spider.max_duration),
            );
        }
        if let Some(ajax) = &settings.spider_ajax {
            jobs.push(
                Job::new("spiderAjax")
                    .param("context", CONTEXT_NAME)
                    .param("url", ajax.url.clone().unwrap_or_else(|| app_url.clone()))
                    .param("maxDuration", ajax.max_duration)
                    .param("browserId", ajax.browser_id.clone()),
            );
        }
        jobs.push(Job::new("passiveScan-wait"));
        if let Some(policy) = &settings.active_scan_policy {
            jobs.push(
                Job::new("activeScan")
                    .param("context", CONTEXT_NAME)
                    .param("policy", policy.clone()),
            );
        }
        jobs.push(
            Job::new("report")
                .param("template", "traditional-json")
                .param(
                    "reportDir",
                    work_dir.join(REPORTS_DIR).to_string_lossy().to_string(),
                )
                .param("reportFile", "zap-report"),
        );

        Ok(Self {
            env: PlanEnv {
                contexts: vec![PlanContext {
                    name: CONTEXT_NAME.to_string(),
                    urls: vec![app_url],
                }],
                parameters: EnvParameters {
                    fail_on_error: true,
                    fail_on_warning: false,
                    progress_to_stdout: false,
                },
            },
            jobs,
        })
    }

    pub fn job_kinds(&self) -> Vec<&str> {
        self.jobs.iter().map(|job| job.kind.as_str()).collect()
    }

    pub fn write(&self, path: &Path) -> Result<(), ZapError> {
        let text = serde_yaml::to_string(self)?;
        fs::write(path, text)?;
        debug!(
            "Wrote automation plan with jobs {:?} to {}",
            self.job_kinds(),
            path.display()
        );
        Ok(())
    }
}

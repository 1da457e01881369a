//! Configuration model.
//!
//! The configuration is a YAML document addressed with dotted paths such as
//! `scanners.zap.miscOptions.zapPort`. Lookups with a default never fail on
//! absent keys. [`ZapSettings`] resolves the scanner section into typed values
//! once, at scanner construction.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::ZapError;

pub const CONFIG_VERSION: u64 = 5;
pub const DEFAULT_EXECUTABLE: &str = "zap.sh";
pub const DEFAULT_ZAP_PORT: u16 = 47691;
pub const DEFAULT_POLICY: &str = "API-scan-minimal";
pub const DEFAULT_AJAX_BROWSER: &str = "firefox-headless";
pub const DEFAULT_RESULTS_DIR: &str = "./results";

#[derive(Debug, Clone)]
pub struct ConfigModel {
    root: Value,
}

impl Default for ConfigModel {
    fn default() -> Self {
        Self {
            root: Value::Mapping(Mapping::new()),
        }
    }
}

impl ConfigModel {
    pub fn from_value(root: Value) -> Result<Self, ZapError> {
        let root = match root {
            Value::Null => Value::Mapping(Mapping::new()),
            Value::Mapping(_) => root,
            _ => {
                return Err(ZapError::Config(
                    "the configuration root must be a mapping".to_string(),
                ))
            }
        };
        let model = Self { root };
        if let Some(version) = model.get_opt::<u64>("config.configVersion")? {
            if version != CONFIG_VERSION {
                return Err(ZapError::Config(format!(
                    "unsupported config version {version} (expected {CONFIG_VERSION})"
                )));
            }
        }
        Ok(model)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ZapError> {
        let root: Value = serde_yaml::from_str(content)?;
        Self::from_value(root)
    }

    pub fn read(path: &Path) -> Result<Self, ZapError> {
        let content = fs::read_to_string(path).map_err(|err| {
            ZapError::Config(format!(
                "unable to read configuration {}: {}",
                path.display(),
                err
            ))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&content)
    }

    /// Raw value at `path`, if every segment exists.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut walk = &self.root;
        for key in path.split('.') {
            walk = walk.as_mapping()?.get(key)?;
        }
        Some(walk)
    }

    /// Typed value at `path`; absent and null entries are `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ZapError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_yaml::from_value(value.clone())
                .map(Some)
                .map_err(|err| ZapError::Config(format!("invalid value for {path}: {err}"))),
        }
    }

    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> Result<T, ZapError> {
        Ok(self.get_opt(path)?.unwrap_or(default))
    }

    /// A feature section counts as enabled when present and not literally `false`.
    pub fn is_enabled(&self, path: &str) -> bool {
        !matches!(self.get(path), None | Some(Value::Bool(false)))
    }

    /// Stores `value` at `path`, creating intermediate mappings.
    ///
    /// With `overwrite == false` an existing entry (or a non-mapping entry in
    /// the way) is left untouched. Returns whether the value was written.
    pub fn set(&mut self, path: &str, value: impl Into<Value>, overwrite: bool) -> bool {
        let keys: Vec<&str> = path.split('.').collect();
        let Some((leaf, parents)) = keys.split_last() else {
            return false;
        };
        let mut walk = &mut self.root;
        for key in parents {
            let Some(map) = walk.as_mapping_mut() else {
                return false;
            };
            let needs_mapping = !matches!(map.get(*key), Some(Value::Mapping(_)));
            if needs_mapping {
                if map.contains_key(*key) && !overwrite {
                    return false;
                }
                map.insert(Value::from(*key), Value::Mapping(Mapping::new()));
            }
            walk = match map.get_mut(*key) {
                Some(next) => next,
                None => return false,
            };
        }
        let Some(map) = walk.as_mapping_mut() else {
            return false;
        };
        if map.contains_key(*leaf) && !overwrite {
            return false;
        }
        map.insert(Value::from(*leaf), value.into());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    pub proxy_host: String,
    pub proxy_port: u16,
}

impl ProxySettings {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.proxy_host, self.proxy_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiderSettings {
    pub url: Option<String>,
    pub max_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AjaxSpiderSettings {
    pub url: Option<String>,
    pub max_duration: u64,
    pub browser_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Literal(String),
    /// Taken from the named variable of the host environment.
    FromHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAuth {
    pub name: String,
    pub value: HeaderValue,
}

/// Typed view of `scanners.<ident>` plus the application and result settings.
#[derive(Debug, Clone)]
pub struct ZapSettings {
    pub executable: String,
    pub application_url: Option<String>,
    pub application_name: String,
    pub results_dir: PathBuf,
    pub proxy: Option<ProxySettings>,
    pub zap_port: u16,
    pub enable_ui: bool,
    pub update_addons: bool,
    pub additional_addons: Vec<String>,
    pub spider: Option<SpiderSettings>,
    pub spider_ajax: Option<AjaxSpiderSettings>,
    pub active_scan_policy: Option<String>,
    pub authentication: Option<HeaderAuth>,
}

impl ZapSettings {
    pub fn from_config(config: &ConfigModel, ident: &str) -> Result<Self, ZapError> {
        let key = |path: &str| format!("scanners.{ident}.{path}");

        let spider = if config.is_enabled(&key("spider")) {
            Some(SpiderSettings {
                url: config.get_opt(&key("spider.url"))?,
                max_duration: config.get_or(&key("spider.maxDuration"), 0)?,
            })
        } else {
            None
        };
        let spider_ajax = if config.is_enabled(&key("spiderAjax")) {
            Some(AjaxSpiderSettings {
                url: config.get_opt(&key("spiderAjax.url"))?,
                max_duration: config.get_or(&key("spiderAjax.maxDuration"), 0)?,
                browser_id: config.get_or(
                    &key("spiderAjax.browserId"),
                    DEFAULT_AJAX_BROWSER.to_string(),
                )?,
            })
        } else {
            None
        };
        let active_scan_policy = if config.is_enabled(&key("activeScan")) {
            Some(config.get_or(&key("activeScan.policy"), DEFAULT_POLICY.to_string())?)
        } else {
            None
        };

        Ok(Self {
            executable: config.get_or(
                &key("container.parameters.executable"),
                DEFAULT_EXECUTABLE.to_string(),
            )?,
            application_url: config.get_opt("application.url")?,
            application_name: config.get_or("application.shortName", "scan".to_string())?,
            results_dir: config.get_or("config.results_dir", PathBuf::from(DEFAULT_RESULTS_DIR))?,
            proxy: config.get_opt(&key("proxy"))?,
            zap_port: config.get_or(&key("miscOptions.zapPort"), DEFAULT_ZAP_PORT)?,
            enable_ui: config.get_or(&key("miscOptions.enableUI"), false)?,
            update_addons: config.get_or(&key("miscOptions.updateAddons"), false)?,
            additional_addons: addon_list(config.get(&key("miscOptions.additionalAddons")))?,
            spider,
            spider_ajax,
            active_scan_policy,
            authentication: header_auth(config, &key("authentication"))?,
        })
    }
}

/// Accepts either a YAML list or a comma separated string.
fn addon_list(value: Option<&Value>) -> Result<Vec<String>, ZapError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => Ok(text.trim().to_string()),
                other => Err(ZapError::Config(format!(
                    "miscOptions.additionalAddons entries must be strings, got {other:?}"
                ))),
            })
            .collect(),
        Some(other) => Err(ZapError::Config(format!(
            "miscOptions.additionalAddons must be a list or a string, got {other:?}"
        ))),
    }
}

fn header_auth(config: &ConfigModel, path: &str) -> Result<Option<HeaderAuth>, ZapError> {
    let Some(kind) = config.get_opt::<String>(&format!("{path}.type"))? else {
        return Ok(None);
    };
    if kind != "http_header" {
        warn!("Unsupported authentication type '{kind}' for a host scan, ignoring it");
        return Ok(None);
    }
    let name = config.get_or(&format!("{path}.parameters.name"), "Authorization".to_string())?;
    let value = match config.get_opt::<String>(&format!("{path}.parameters.value_from_var"))? {
        Some(var) => HeaderValue::FromHost(var),
        None => match config.get_opt::<String>(&format!("{path}.parameters.value"))? {
            Some(value) => HeaderValue::Literal(value),
            None => {
                return Err(ZapError::Config(format!(
                    "{path}.parameters needs either `value` or `value_from_var`"
                )))
            }
        },
    };
    Ok(Some(HeaderAuth { name, value }))
}

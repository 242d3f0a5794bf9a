use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use client_core::{ControllerConfig, LoadFailurePolicy};
use url::Url;

const SETTINGS_FILE: &str = "desk.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_base_url: String,
    pub resource: String,
    pub notification_ttl_ms: u64,
    pub request_timeout_ms: u64,
    pub load_failure_policy: LoadFailurePolicy,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            resource: "purchases".into(),
            notification_ttl_ms: 5_000,
            request_timeout_ms: 30_000,
            load_failure_policy: LoadFailurePolicy::KeepStale,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            notification_ttl: Duration::from_millis(self.notification_ttl_ms),
            load_failure_policy: self.load_failure_policy,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn base_url(&self) -> anyhow::Result<Url> {
        normalize_base_url(&self.api_base_url)
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            for (key, value) in &file_cfg {
                apply(&mut settings, key, value);
            }
        }
    }

    if let Some(v) = env("API_BASE_URL") {
        apply(&mut settings, "api_base_url", &v);
    }
    if let Some(v) = env("RUST_LOG") {
        apply(&mut settings, "log_filter", &v);
    }

    for key in [
        "api_base_url",
        "resource",
        "notification_ttl_ms",
        "request_timeout_ms",
        "load_failure_policy",
        "log_filter",
    ] {
        if let Some(v) = env(&format!("APP__{}", key.to_ascii_uppercase())) {
            apply(&mut settings, key, &v);
        }
    }

    settings
}

/// Unparseable values leave the current setting in place.
fn apply(settings: &mut Settings, key: &str, value: &str) {
    match key {
        "api_base_url" => settings.api_base_url = value.to_string(),
        "resource" => settings.resource = value.to_string(),
        "notification_ttl_ms" => {
            if let Ok(parsed) = value.trim().parse::<u64>() {
                settings.notification_ttl_ms = parsed;
            }
        }
        "request_timeout_ms" => {
            if let Ok(parsed) = value.trim().parse::<u64>() {
                settings.request_timeout_ms = parsed;
            }
        }
        "load_failure_policy" => {
            if let Ok(parsed) = value.parse::<LoadFailurePolicy>() {
                settings.load_failure_policy = parsed;
            }
        }
        "log_filter" => settings.log_filter = value.to_string(),
        _ => {}
    }
}

/// Accepts `host:port/api` shorthand by assuming `http://`.
pub fn normalize_base_url(raw: &str) -> anyhow::Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("api base url is empty");
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate)
        .with_context(|| format!("invalid api base url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("api base url '{raw}' must use http or https");
    }
    Ok(url)
}

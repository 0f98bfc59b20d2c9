//! Environment and version metadata for `simtest env` / `simtest version`.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvInfo {
    pub os: String,
    pub arch: String,
    pub simtest: VersionInfo,
    #[serde(rename = "projectRoot", skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
    #[serde(rename = "baselinePath")]
    pub baseline_path: String,
    pub backends: BTreeMap<String, BackendInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendInfo {
    pub program: String,
    pub available: bool,
    #[serde(rename = "isDefault")]
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: option_env!("SIMTEST_COMMIT").map(|s| s.to_string()),
        build_date: option_env!("SIMTEST_BUILD_DATE").map(|s| s.to_string()),
    }
}

pub fn env_info(config: &crate::Config) -> EnvInfo {
    let release = format!("{}{}", config.executable, config.mode_suffixes.release);
    let mut backends = BTreeMap::new();
    backends.insert(
        crate::BackendKind::Subprocess.as_str().to_string(),
        BackendInfo {
            available: on_path(&release),
            program: release,
            is_default: config.backend == crate::BackendKind::Subprocess,
        },
    );
    backends.insert(
        crate::BackendKind::Inprocess.as_str().to_string(),
        BackendInfo {
            program: "<linked engine>".to_string(),
            available: crate::engine_registered(),
            is_default: config.backend == crate::BackendKind::Inprocess,
        },
    );
    backends.insert(
        crate::BackendKind::Debugger.as_str().to_string(),
        BackendInfo {
            program: config.debugger.program.clone(),
            available: on_path(&config.debugger.program),
            is_default: config.backend == crate::BackendKind::Debugger,
        },
    );

    EnvInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        simtest: version_info(),
        project_root: config
            .resolve_project_root(None)
            .ok()
            .map(|p| p.to_string_lossy().to_string()),
        baseline_path: config.baseline_file().to_string_lossy().to_string(),
        backends,
    }
}

fn on_path(program: &str) -> bool {
    let candidate = std::path::Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

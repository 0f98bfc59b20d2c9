//! Task generation from simulation ini files.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::{BackendKind, Category, Config, Outcome, SimTime, SimtestError, SimtestResult, Task, TaskKey};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniSection {
    pub name: String,
    pub extends: Vec<String>,
    pub network: Option<String>,
    pub sim_time_limit: Option<String>,
    pub repeat: Option<u32>,
    pub description: Option<String>,
    pub abstract_config: bool,
    pub expected_result: Option<Outcome>,
}

/// The sections of one ini file, in file order.
#[derive(Debug, Clone, Default)]
pub struct IniFile {
    sections: Vec<IniSection>,
}

/// A concrete config after `extends`/`General` inheritance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub name: String,
    pub network: Option<String>,
    pub sim_time_limit: Option<String>,
    pub repeat: u32,
    pub description: Option<String>,
    pub is_abstract: bool,
    pub expected_result: Option<Outcome>,
}

impl IniFile {
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<IniSection> = Vec::new();
        let mut current = IniSection {
            name: crate::DEFAULT_CONFIG.to_string(),
            ..IniSection::default()
        };
        let mut seen_header = false;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(directive) = line.strip_prefix('#') {
                apply_directive(&mut current, directive.trim());
                continue;
            }
            if line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if seen_header || current != blank_general() {
                    sections.push(current);
                }
                seen_header = true;
                let header = header.trim();
                let name = header
                    .strip_prefix("Config ")
                    .map(|n| n.trim().to_string())
                    .unwrap_or_else(|| header.to_string());
                current = IniSection {
                    name,
                    ..IniSection::default()
                };
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!("ignoring unparseable ini line {}: {raw:?}", lineno + 1);
                continue;
            };
            let key = key.trim();
            let value = strip_value(value);
            match key {
                "extends" => {
                    current.extends = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "network" => current.network = Some(value),
                "sim-time-limit" => current.sim_time_limit = Some(value),
                "repeat" => match value.parse::<u32>() {
                    Ok(n) => current.repeat = Some(n),
                    Err(_) => tracing::warn!("ignoring non-numeric repeat {value:?} in [{}]", current.name),
                },
                "description" => current.description = Some(value),
                _ => {}
            }
        }
        sections.push(current);
        Self { sections }
    }

    pub fn read(path: &Path) -> SimtestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SimtestError::Config(format!("failed to read ini file {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    pub fn sections(&self) -> &[IniSection] {
        &self.sections
    }

    fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Base sections in lookup order: own `extends` depth first, then `General`.
    fn lineage(&self, name: &str) -> Vec<&IniSection> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_lineage(name, &mut out, &mut seen);
        if name != crate::DEFAULT_CONFIG
            && seen.insert(crate::DEFAULT_CONFIG.to_string())
            && let Some(general) = self.section(crate::DEFAULT_CONFIG)
        {
            out.push(general);
        }
        out
    }

    fn collect_lineage<'a>(&'a self, name: &str, out: &mut Vec<&'a IniSection>, seen: &mut HashSet<String>) {
        if !seen.insert(name.to_string()) {
            return;
        }
        let Some(section) = self.section(name) else {
            tracing::warn!("config {name:?} referenced by extends is not defined");
            return;
        };
        out.push(section);
        for base in &section.extends {
            self.collect_lineage(base, out, seen);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<ResolvedConfig> {
        let own = self.section(name)?;
        let lineage = self.lineage(name);
        let inherited = |pick: fn(&IniSection) -> Option<&String>| {
            lineage.iter().find_map(|s| pick(s)).cloned()
        };
        let network = inherited(|s| s.network.as_ref());
        let description = own.description.clone();
        let is_abstract = own.abstract_config
            || description.as_deref().is_some_and(|d| d.contains("(abstract)"))
            || network.is_none();
        Some(ResolvedConfig {
            name: name.to_string(),
            network,
            sim_time_limit: inherited(|s| s.sim_time_limit.as_ref()),
            repeat: lineage.iter().find_map(|s| s.repeat).unwrap_or(1).max(1),
            description,
            is_abstract,
            expected_result: own.expected_result,
        })
    }

    /// Concrete (non-abstract) configs in file order.
    pub fn concrete_configs(&self) -> Vec<ResolvedConfig> {
        self.sections
            .iter()
            .filter_map(|s| self.resolve(&s.name))
            .filter(|c| !c.is_abstract)
            .collect()
    }
}

fn blank_general() -> IniSection {
    IniSection {
        name: crate::DEFAULT_CONFIG.to_string(),
        ..IniSection::default()
    }
}

fn apply_directive(section: &mut IniSection, directive: &str) {
    let Some((key, value)) = directive.split_once('=') else {
        return;
    };
    let value = strip_value(value);
    match key.trim() {
        "abstract-config" => section.abstract_config = value.eq_ignore_ascii_case("true"),
        "expected-result" => match value.parse::<Outcome>() {
            Ok(outcome) => section.expected_result = Some(outcome),
            Err(_) => tracing::warn!("ignoring unknown expected-result {value:?} in [{}]", section.name),
        },
        _ => {}
    }
}

fn strip_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('"') {
        return rest.split('"').next().unwrap_or("").to_string();
    }
    raw.split('#').next().unwrap_or("").trim().to_string()
}

/// Enumerates one task per (ini file, concrete config, run index) under `root`,
/// sorted by (working directory, ini file, config, run).
pub fn generate_tasks(
    root: &Path,
    config: &Config,
    category: Category,
    backend: BackendKind,
) -> SimtestResult<Vec<Task>> {
    let files = crate::find_matching_files(root, &config.ini_globs)?;
    let mut by_key: BTreeMap<TaskKey, Task> = BTreeMap::new();
    for rel in files {
        if rel.starts_with(&config.base_dir) {
            continue;
        }
        let working_dir = rel
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let ini_file = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let ini = IniFile::read(&root.join(&rel))?;
        for resolved in ini.concrete_configs() {
            for run in 0..resolved.repeat {
                let key = TaskKey::new(working_dir.clone(), ini_file.clone(), resolved.name.clone(), run);
                let mut task = Task::new(root, key.clone(), category, backend);
                task.sim_time_limit = checked_sim_time_limit(&rel, &resolved)?;
                task.expected = resolved.expected_result;
                task.description = resolved.description.clone();
                if category == Category::Regression {
                    task.resolve_eventlog(config);
                }
                by_key.insert(key, task);
            }
        }
    }
    tracing::debug!("generated {} {category} tasks under {}", by_key.len(), root.display());
    Ok(by_key.into_values().collect())
}

/// Rejects a `sim-time-limit` the engine would refuse. Values built from
/// iteration variables (`${...}`) are left for the engine to expand.
fn checked_sim_time_limit(ini: &Path, resolved: &ResolvedConfig) -> SimtestResult<Option<String>> {
    let Some(limit) = &resolved.sim_time_limit else {
        return Ok(None);
    };
    if limit.contains("${") {
        tracing::debug!("{}: [Config {}] sim-time-limit {limit:?} left to the engine", ini.display(), resolved.name);
        return Ok(Some(limit.clone()));
    }
    limit.parse::<SimTime>().map_err(|e| {
        SimtestError::Config(format!("{}: [Config {}] sim-time-limit: {e}", ini.display(), resolved.name))
    })?;
    Ok(Some(limit.clone()))
}

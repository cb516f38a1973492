//! Service unit files.
//!
//! INI-style `.service` files in the configuration directory:
//!
//! ```text
//! [Unit]
//! Description=Message bus broker
//! Depends=connect
//!
//! [Service]
//! Stage=init
//! Type=daemon
//! ExecStart=/cmd/busd
//! Restart=yes
//! ```
//!
//! The service name is the file stem. A stem containing `@` marks a
//! template: parsed, but never enrolled. Unknown keys are ignored.

use std::collections::HashMap;
use std::path::Path;

/// Bring-up phase a service belongs to. Stages run strictly in the order
/// listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreInit,
    Init,
    PostInit,
    Service,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::PreInit, Stage::Init, Stage::PostInit, Stage::Service];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre-init" => Some(Self::PreInit),
            "init" => Some(Self::Init),
            "post-init" => Some(Self::PostInit),
            "service" => Some(Self::Service),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreInit => "pre-init",
            Self::Init => "init",
            Self::PostInit => "post-init",
            Self::Service => "service",
        }
    }
}

/// Oneshot services run to completion once; daemons are monitored and
/// optionally restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Kind {
    Oneshot,
    #[default]
    Daemon,
}

impl Kind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oneshot" => Some(Self::Oneshot),
            "daemon" => Some(Self::Daemon),
            _ => None,
        }
    }
}

/// Runtime state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    NotStarted,
    Started,
    Running,
    Finished,
    Failed,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::Started => "started",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Whether a dependency in this state lets its dependents proceed.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Running | Self::Finished)
    }
}

/// A parsed service unit.
#[derive(Debug, Clone)]
pub struct ServiceUnit {
    pub name: String,
    pub description: Option<String>,
    pub stage: Stage,
    pub kind: Kind,
    /// Argv of the service command.
    pub command: Vec<String>,
    pub restart: bool,
    pub depends: Vec<String>,
    /// Templates are parsed but never enrolled.
    pub template: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("section '{0}' appears more than once")]
    DuplicateSection(String),

    #[error("unit has no usable file name")]
    NoName,

    #[error("missing ExecStart")]
    MissingCommand,

    #[error("invalid {key} value: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid shell quoting in: {0}")]
    BadQuoting(String),
}

type ParsedSection = HashMap<String, Vec<String>>;
type ParsedFile = HashMap<String, ParsedSection>;

/// Split a unit file into `[Section]` blocks of KEY=VALUE lines. Keys are
/// uppercased; repeated keys accumulate, later single-value reads take
/// the last occurrence.
fn parse_sections(content: &str) -> Result<ParsedFile, UnitError> {
    let mut sections = ParsedFile::new();
    let mut current: Option<(String, ParsedSection)> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            if let Some((name, body)) = current.take() {
                if sections.insert(name.clone(), body).is_some() {
                    return Err(UnitError::DuplicateSection(name));
                }
            }
            current = Some((line.to_string(), ParsedSection::new()));
            continue;
        }

        let Some((_, body)) = current.as_mut() else {
            // Lines before the first section header.
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        body.entry(key.trim().to_uppercase())
            .or_default()
            .push(value.trim().to_string());
    }

    if let Some((name, body)) = current.take() {
        if sections.insert(name.clone(), body).is_some() {
            return Err(UnitError::DuplicateSection(name));
        }
    }

    Ok(sections)
}

fn single(section: &ParsedSection, key: &str) -> Option<String> {
    section.get(key).and_then(|values| values.last()).cloned()
}

/// Convert "yes/true/1/on" to bool.
pub fn string_to_bool(s: &str) -> bool {
    matches!(s.to_uppercase().as_str(), "YES" | "TRUE" | "1" | "ON")
}

/// Parse unit file content. `name` is the service name (the file stem).
pub fn parse_unit(name: &str, content: &str) -> Result<ServiceUnit, UnitError> {
    let sections = parse_sections(content)?;
    let empty = ParsedSection::new();
    let unit = sections.get("[Unit]").unwrap_or(&empty);
    let service = sections.get("[Service]").unwrap_or(&empty);

    let description = single(unit, "DESCRIPTION");
    let depends = unit
        .get("DEPENDS")
        .map(|values| {
            values
                .iter()
                .flat_map(|v| v.split_whitespace())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let stage = match single(service, "STAGE") {
        Some(value) => Stage::parse(&value).ok_or(UnitError::InvalidValue {
            key: "Stage",
            value,
        })?,
        None => Stage::Service,
    };

    let kind = match single(service, "TYPE") {
        Some(value) => Kind::parse(&value).ok_or(UnitError::InvalidValue {
            key: "Type",
            value,
        })?,
        None => Kind::default(),
    };

    let restart = single(service, "RESTART")
        .map(|v| string_to_bool(&v))
        .unwrap_or(false);

    let exec = single(service, "EXECSTART").ok_or(UnitError::MissingCommand)?;
    let command = shlex::split(&exec).ok_or_else(|| UnitError::BadQuoting(exec.clone()))?;
    if command.is_empty() {
        return Err(UnitError::MissingCommand);
    }

    Ok(ServiceUnit {
        name: name.to_string(),
        description,
        stage,
        kind,
        command,
        restart,
        depends,
        template: name.contains('@'),
    })
}

/// Load a unit file from disk.
pub async fn load_unit(path: &Path) -> Result<ServiceUnit, UnitError> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or(UnitError::NoName)?
        .to_string();
    let content = tokio::fs::read_to_string(path).await?;
    parse_unit(&name, &content)
}

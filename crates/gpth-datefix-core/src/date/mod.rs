pub mod folder;
pub mod guess;
pub mod json;

use std::fmt;
use std::path::Path;

use chrono::NaiveDateTime;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::sidecar::SidecarRecord;

/// Evidence tier a date came from, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateSource {
    Json,
    Filename,
    FolderYear,
    None,
}

impl DateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateSource::Json => "json",
            DateSource::Filename => "filename",
            DateSource::FolderYear => "folder-year",
            DateSource::None => "none",
        }
    }
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How sidecar epochs are turned into wall-clock time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBasis {
    #[default]
    Utc,
    Local,
}

/// The single date chosen for a file, or unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedDate {
    pub date: Option<NaiveDateTime>,
    pub source: DateSource,
}

impl ResolvedDate {
    pub fn unresolved() -> Self {
        Self {
            date: None,
            source: DateSource::None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.date.is_some()
    }
}

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveInput<'a> {
    pub path: &'a Path,
    /// Scan root; ancestors above it are not considered for folder years
    pub root: Option<&'a Path>,
    pub sidecar: Option<&'a SidecarRecord>,
}

impl<'a> ResolveInput<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self {
            path,
            root: None,
            sidecar: None,
        }
    }

    pub fn with_root(mut self, root: &'a Path) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_sidecar(mut self, sidecar: Option<&'a SidecarRecord>) -> Self {
        self.sidecar = sidecar;
        self
    }
}

/// One evidence source in the fallback chain.
pub trait DateStrategy {
    fn source(&self) -> DateSource;
    fn resolve(&self, input: &ResolveInput) -> Option<NaiveDateTime>;
}

/// Ordered list of strategies; the first one that yields a date wins.
pub struct Resolver {
    strategies: Vec<Box<dyn DateStrategy + Send + Sync>>,
}

impl Resolver {
    pub fn new(strategies: Vec<Box<dyn DateStrategy + Send + Sync>>) -> Self {
        Self { strategies }
    }

    /// Sidecar, then `YYYYMMDD_HHMMSS` filenames (unless disabled), then folder year.
    pub fn standard(basis: TimeBasis, allow_guess: bool) -> Self {
        Self::configured(basis, allow_guess, false)
    }

    /// [`Resolver::standard`], optionally accepting the extended filename shapes.
    pub fn configured(basis: TimeBasis, allow_guess: bool, extended_names: bool) -> Self {
        let mut strategies: Vec<Box<dyn DateStrategy + Send + Sync>> =
            vec![Box::new(json::SidecarTakenTime { basis })];
        if allow_guess {
            strategies.push(Box::new(guess::FilenameTimestamp {
                extended: extended_names,
            }));
        }
        strategies.push(Box::new(folder::FolderYear::default()));
        Self::new(strategies)
    }

    pub fn sources(&self) -> Vec<DateSource> {
        self.strategies.iter().map(|s| s.source()).collect()
    }

    pub fn resolve(&self, input: &ResolveInput) -> ResolvedDate {
        for strategy in &self.strategies {
            if let Some(date) = strategy.resolve(input) {
                debug!("{}: {} via {}", input.path.display(), date, strategy.source());
                return ResolvedDate {
                    date: Some(date),
                    source: strategy.source(),
                };
            }
        }
        ResolvedDate::unresolved()
    }
}

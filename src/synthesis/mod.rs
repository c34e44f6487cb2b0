//! Collector configuration synthesis
//!
//! Turns the candidate pipelines of one signal type into a single
//! [`CollectorConfigDocument`]. Candidates are sorted by creation time and
//! name first, so the document only depends on the set of inputs, never on
//! the order they arrived in. A [`CapacityLock`] caps how many pipelines are
//! routed; the rest are reported as [`PipelineOutcome::MaxPipelinesExceeded`]
//! and left out of the document without affecting the admitted ones.
//! Log pipelines also share the agent's environment and file namespace; a
//! pipeline claiming a variable or file name an older one already holds is
//! reported as [`PipelineOutcome::Conflict`].

mod document;
pub mod fluentbit;
pub mod otel;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

pub use document::{CollectorConfigDocument, DocumentParts};

use crate::config::OperatorConfig;
use crate::crd::{SignalSpec, SignalType};
use crate::secrets::ResolvedCredentials;
use crate::Error;

/// Settings that shape the rendered documents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Namespace of the collector workloads
    pub namespace: String,
    /// Filesystem buffer per log output
    pub fs_buffer_limit: String,
    /// In-memory buffer of the log input
    pub mem_buf_limit: String,
}

impl SynthesisOptions {
    /// Defaults for workloads in `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            fs_buffer_limit: "1G".to_string(),
            mem_buf_limit: "5MB".to_string(),
        }
    }

    /// Options derived from the operator configuration
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(config.namespace.clone())
    }
}

/// A validated pipeline whose credentials resolved
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineCandidate {
    /// Pipeline name
    pub name: String,
    /// Creation timestamp, used for ordering
    pub created: Option<DateTime<Utc>>,
    /// Spec
    pub spec: SignalSpec,
    /// Resolved credential fields
    pub credentials: ResolvedCredentials,
}

/// What synthesis decided for one candidate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Routed by the document
    Admitted,
    /// Left out because the signal type is at capacity
    MaxPipelinesExceeded,
    /// Left out because a name it needs is taken
    Conflict {
        /// What is taken, and by whom
        message: String,
    },
}

/// A name a pipeline places into a map shared by the whole collector
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SharedName {
    Variable(String),
    File(String),
}

impl std::fmt::Display for SharedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Variable(name) => write!(f, "variable '{name}'"),
            Self::File(name) => write!(f, "file '{name}'"),
        }
    }
}

fn shared_names(spec: &SignalSpec) -> Vec<SharedName> {
    match spec {
        SignalSpec::Logs(spec) => spec
            .variables
            .iter()
            .map(|v| SharedName::Variable(v.name.clone()))
            .chain(spec.files.iter().map(|f| SharedName::File(f.name.clone())))
            .collect(),
        SignalSpec::Metrics(_) | SignalSpec::Traces(_) => Vec::new(),
    }
}

/// Per-signal pipeline cap with sticky slots.
///
/// A pipeline holding a slot keeps it until released, even if the cap is
/// lowered; newcomers only get free slots. A cap of 0 means unlimited.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapacityLock {
    cap: usize,
    holders: BTreeSet<String>,
}

impl CapacityLock {
    /// Lock with `cap` slots
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            holders: BTreeSet::new(),
        }
    }

    /// Configured cap
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Whether `name` holds a slot
    pub fn holds(&self, name: &str) -> bool {
        self.holders.contains(name)
    }

    /// Take a slot for `name`; true if it holds one afterwards
    pub fn try_acquire(&mut self, name: &str) -> bool {
        if self.holders.contains(name) {
            return true;
        }
        if self.cap != 0 && self.holders.len() >= self.cap {
            return false;
        }
        self.holders.insert(name.to_string());
        true
    }

    /// Free the slot of `name`
    pub fn release(&mut self, name: &str) {
        self.holders.remove(name);
    }

    /// Free slots of pipelines that no longer exist
    pub fn retain_existing<'a>(&mut self, existing: impl IntoIterator<Item = &'a str>) {
        let existing: BTreeSet<&str> = existing.into_iter().collect();
        self.holders.retain(|h| existing.contains(h.as_str()));
    }

    /// Current slot holders
    pub fn holders(&self) -> impl Iterator<Item = &str> {
        self.holders.iter().map(String::as_str)
    }
}

/// Result of one synthesis run
#[derive(Clone, Debug)]
pub struct Synthesis {
    /// The document covering every admitted pipeline
    pub document: CollectorConfigDocument,
    /// Outcome per candidate name
    pub outcomes: BTreeMap<String, PipelineOutcome>,
}

/// Environment variable name derived from its parts: uppercase, with every
/// character outside `[A-Z0-9]` replaced by `_`.
pub fn env_var_name(parts: &[&str]) -> String {
    parts
        .join("_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the document for `signal` out of `candidates`.
///
/// Errors are deterministic for a given input and must not be retried
/// without an input change.
pub fn synthesize(
    signal: SignalType,
    candidates: &[PipelineCandidate],
    lock: &mut CapacityLock,
    options: &SynthesisOptions,
) -> crate::Result<Synthesis> {
    if let Some(stray) = candidates.iter().find(|c| c.spec.signal() != signal) {
        return Err(Error::synthesis(format!(
            "{}: {} pipeline passed to {signal} synthesis",
            stray.name,
            stray.spec.signal()
        )));
    }

    let mut ordered: Vec<&PipelineCandidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    ordered.dedup_by(|a, b| a.name == b.name);

    let mut claimed: BTreeMap<SharedName, String> = [
        fluentbit::MAIN_FILE,
        fluentbit::PIPELINES_FILE,
        fluentbit::SCRIPT_FILE,
    ]
    .into_iter()
    .map(|file| (SharedName::File(file.to_string()), "the agent configuration".to_string()))
    .collect();

    let mut outcomes = BTreeMap::new();
    let mut admitted = Vec::new();
    for candidate in ordered {
        let names = shared_names(&candidate.spec);
        let taken = names
            .iter()
            .find_map(|n| claimed.get(n).map(|owner| format!("{n} is already used by {owner}")));
        if let Some(message) = taken {
            lock.release(&candidate.name);
            outcomes.insert(candidate.name.clone(), PipelineOutcome::Conflict { message });
            continue;
        }

        if lock.try_acquire(&candidate.name) {
            for name in names {
                claimed.insert(name, format!("pipeline '{}'", candidate.name));
            }
            outcomes.insert(candidate.name.clone(), PipelineOutcome::Admitted);
            admitted.push(candidate);
        } else {
            outcomes.insert(candidate.name.clone(), PipelineOutcome::MaxPipelinesExceeded);
        }
    }

    let mut parts = DocumentParts {
        pipelines: admitted.iter().map(|c| c.name.clone()).collect(),
        ..Default::default()
    };
    match signal {
        SignalType::Logs => {
            let config = fluentbit::build(&admitted, options)?;
            parts.files = config.files;
            parts.env = config.env;
            parts.secret_files = config.secret_files;
            parts.monitor_ids = config.monitor_ids;
        }
        SignalType::Metrics | SignalType::Traces => {
            let config = otel::build_gateway(signal, &admitted, options)?;
            parts.files = config.files;
            parts.env = config.env;
            parts.monitor_ids = config.monitor_ids;
            if signal == SignalType::Metrics {
                if let Some(agent) = otel::build_metric_agent(&admitted, options)? {
                    parts.files.insert(otel::AGENT_FILE.to_string(), agent);
                }
            }
        }
    }

    let document = CollectorConfigDocument::new(signal, parts);
    debug!(
        signal = %signal,
        admitted = document.pipelines().len(),
        fingerprint = %document.fingerprint(),
        "Synthesized collector configuration"
    );
    Ok(Synthesis { document, outcomes })
}

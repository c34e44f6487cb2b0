//! The synthesized configuration of one signal type

use std::collections::BTreeMap;

use crate::crd::SignalType;
use crate::kube_utils::deterministic_hash;

/// Configuration shared by every admitted pipeline of one signal type.
///
/// Content is immutable once built so the fingerprint always describes it.
/// Plain configuration lands in a ConfigMap, `env` and `secret_files` in a
/// Secret next to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectorConfigDocument {
    signal: SignalType,
    pipelines: Vec<String>,
    files: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    secret_files: BTreeMap<String, String>,
    monitor_ids: BTreeMap<String, String>,
    fingerprint: String,
}

/// Everything a document is made of
#[derive(Debug, Default)]
pub struct DocumentParts {
    /// Admitted pipelines, in routing order
    pub pipelines: Vec<String>,
    /// Configuration files
    pub files: BTreeMap<String, String>,
    /// Environment variables carrying credentials
    pub env: BTreeMap<String, String>,
    /// Credential files (TLS material)
    pub secret_files: BTreeMap<String, String>,
    /// Component id found in collector metrics -> pipeline name
    pub monitor_ids: BTreeMap<String, String>,
}

fn feed(buf: &mut Vec<u8>, section: &str, map: &BTreeMap<String, String>) {
    buf.extend_from_slice(section.as_bytes());
    buf.push(0);
    for (key, value) in map {
        buf.extend_from_slice(&(key.len() as u64).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        buf.extend_from_slice(value.as_bytes());
    }
}

impl CollectorConfigDocument {
    /// Assemble a document and compute its fingerprint
    pub fn new(signal: SignalType, parts: DocumentParts) -> Self {
        let mut buf = Vec::new();
        buf.extend_from_slice(signal.as_str().as_bytes());
        buf.push(0);
        for pipeline in &parts.pipelines {
            buf.extend_from_slice(pipeline.as_bytes());
            buf.push(0);
        }
        feed(&mut buf, "files", &parts.files);
        feed(&mut buf, "env", &parts.env);
        feed(&mut buf, "secret_files", &parts.secret_files);

        Self {
            signal,
            pipelines: parts.pipelines,
            files: parts.files,
            env: parts.env,
            secret_files: parts.secret_files,
            monitor_ids: parts.monitor_ids,
            fingerprint: deterministic_hash(&buf),
        }
    }

    /// Signal type this document configures
    pub fn signal(&self) -> SignalType {
        self.signal
    }

    /// Admitted pipelines, in routing order
    pub fn pipelines(&self) -> &[String] {
        &self.pipelines
    }

    /// Configuration files
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    /// A single configuration file
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Credential environment variables
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Credential files
    pub fn secret_files(&self) -> &BTreeMap<String, String> {
        &self.secret_files
    }

    /// Pipeline owning a component id seen in collector metrics
    pub fn pipeline_for_component(&self, component: &str) -> Option<&str> {
        self.monitor_ids.get(component).map(String::as_str)
    }

    /// All component ids mapped to their pipelines
    pub fn monitor_ids(&self) -> &BTreeMap<String, String> {
        &self.monitor_ids
    }

    /// Stable content hash covering files, env and credential files
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(env_value: &str) -> DocumentParts {
        DocumentParts {
            pipelines: vec!["a".to_string()],
            files: BTreeMap::from([("gateway.yaml".to_string(), "receivers: {}".to_string())]),
            env: BTreeMap::from([("OTLP_ENDPOINT_A".to_string(), env_value.to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_tracks_credentials() {
        let a = CollectorConfigDocument::new(SignalType::Traces, parts("http://one"));
        let b = CollectorConfigDocument::new(SignalType::Traces, parts("http://one"));
        let rotated = CollectorConfigDocument::new(SignalType::Traces, parts("http://two"));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), rotated.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_fingerprint_differs_per_signal() {
        let traces = CollectorConfigDocument::new(SignalType::Traces, parts("x"));
        let metrics = CollectorConfigDocument::new(SignalType::Metrics, parts("x"));
        assert_ne!(traces.fingerprint(), metrics.fingerprint());
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let mut left = DocumentParts::default();
        left.env.insert("AB".to_string(), "C".to_string());
        let mut right = DocumentParts::default();
        right.env.insert("A".to_string(), "BC".to_string());
        assert_ne!(
            CollectorConfigDocument::new(SignalType::Logs, left).fingerprint(),
            CollectorConfigDocument::new(SignalType::Logs, right).fingerprint()
        );
    }
}

//! LogPipeline and MetricPipeline conversion between v1alpha1 and v1beta1
//!
//! Conversion is driven by [`FIELD_MAPPINGS`]: every path of a kind that
//! differs between the two versions is listed with the rule that carries its
//! value across. Paths not listed are shared and copied as they are. The
//! result is parsed into the typed spec of the target version, so a
//! conversion never produces an object the API server would reject.
//!
//! For every v1alpha1 LogPipeline spec `s`, `to_v1alpha1(to_v1beta1(s)) == s`,
//! given that `namespaces.system` only counts while no namespace is listed. A
//! v1beta1 spec round-trips up to the spelling of "off": `keepAnnotations:
//! false` and an absent `keepAnnotations` are the same setting.
//!
//! MetricPipelines keep their shape. Namespace names that are not DNS-1123
//! labels are dropped on the way up and copied unchanged on the way down.

use serde_json::{Map, Value};
use tracing::debug;

use crate::crd::{self, v1alpha1, STORAGE_VERSION};
use crate::validation::is_dns_label;
use crate::Error;

/// API group of every conduit kind
pub const API_GROUP: &str = "telemetry.conduit.dev";

/// Kind served at both versions with differing paths
pub const LOG_PIPELINE: &str = "LogPipeline";

/// Kind served at both versions with the same paths
pub const METRIC_PIPELINE: &str = "MetricPipeline";

/// How a value moves between a v1alpha1 path and a v1beta1 path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingRule {
    /// Same value, different path
    Rename,
    /// `false` on one side is an absent optional on the other
    FalseIsAbsent,
    /// An empty selector on one side is an absent selector on the other
    EmptyIsAbsent,
    /// v1alpha1 `{include, exclude, system}` against the v1beta1 selector.
    /// `system: true` with nothing else selected is an explicit empty
    /// selector; nothing selected at all is an absent selector.
    SystemNamespaces,
    /// Same selector; names that are not DNS-1123 labels are dropped going
    /// up and kept going down
    SanitizeNamespaces,
}

/// One row of the mapping table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldMapping {
    /// Kind the row applies to
    pub kind: &'static str,
    /// Dotted path in the v1alpha1 spec
    pub v1alpha1: &'static str,
    /// Dotted path in the v1beta1 spec
    pub v1beta1: &'static str,
    /// Value rule
    pub rule: MappingRule,
}

const fn log(v1alpha1: &'static str, v1beta1: &'static str, rule: MappingRule) -> FieldMapping {
    FieldMapping {
        kind: LOG_PIPELINE,
        v1alpha1,
        v1beta1,
        rule,
    }
}

const fn metric_namespaces(path: &'static str) -> FieldMapping {
    FieldMapping {
        kind: METRIC_PIPELINE,
        v1alpha1: path,
        v1beta1: path,
        rule: MappingRule::SanitizeNamespaces,
    }
}

/// Every spec path that differs between v1alpha1 and v1beta1, per kind.
/// Nested rows come before the row moving their parent.
pub const FIELD_MAPPINGS: &[FieldMapping] = &[
    log("input.application.namespaces", "input.runtime.namespaces", MappingRule::SystemNamespaces),
    log("input.application.containers", "input.runtime.containers", MappingRule::EmptyIsAbsent),
    log("input.application.keepAnnotations", "input.runtime.keepAnnotations", MappingRule::FalseIsAbsent),
    log("input.application.dropLabels", "input.runtime.dropLabels", MappingRule::FalseIsAbsent),
    log("input.application", "input.runtime", MappingRule::Rename),
    log("output.http.tls.disabled", "output.http.tls.insecure", MappingRule::Rename),
    log(
        "output.http.tls.skipCertificateValidation",
        "output.http.tls.insecureSkipVerify",
        MappingRule::Rename,
    ),
    metric_namespaces("input.prometheus.namespaces"),
    metric_namespaces("input.runtime.namespaces"),
    metric_namespaces("input.istio.namespaces"),
    metric_namespaces("input.otlp.namespaces"),
];

/// Direction of a conversion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// v1alpha1 to v1beta1
    Up,
    /// v1beta1 to v1alpha1
    Down,
}

impl Direction {
    fn paths(self, m: &FieldMapping) -> (&'static str, &'static str) {
        match self {
            Self::Up => (m.v1alpha1, m.v1beta1),
            Self::Down => (m.v1beta1, m.v1alpha1),
        }
    }
}

// =============================================================================
// JSON path helpers
// =============================================================================

fn take(root: &mut Value, path: &str) -> Option<Value> {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (get_mut(root, parent)?, leaf),
        None => (root, path),
    };
    parent.as_object_mut()?.remove(leaf)
}

fn get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .try_fold(root, |node, key| node.as_object_mut()?.get_mut(key))
}

/// Write `value` at `path`, creating intermediate objects. Two objects meeting
/// at the same path are merged, keys already present winning.
fn put(root: &mut Value, path: &str, value: Value) -> crate::Result<()> {
    let mut node = root;
    let mut keys = path.split('.').peekable();
    while let Some(key) = keys.next() {
        let object = node
            .as_object_mut()
            .ok_or_else(|| Error::serialization(format!("{path}: parent is not an object")))?;
        if keys.peek().is_none() {
            match (object.get_mut(key), value) {
                (Some(Value::Object(existing)), Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        existing.entry(k).or_insert(v);
                    }
                }
                (_, value) => {
                    object.insert(key.to_string(), value);
                }
            }
            return Ok(());
        }
        node = object
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

fn is_empty_selector(value: &Value) -> bool {
    let empty = |key: &str| {
        value
            .get(key)
            .map_or(true, |v| v.as_array().is_some_and(|a| a.is_empty()))
    };
    empty("include") && empty("exclude")
}

// =============================================================================
// Rules
// =============================================================================

/// Transform one value; `None` means the target path stays absent
fn apply_rule(rule: MappingRule, direction: Direction, value: Value) -> Option<Value> {
    match (rule, direction) {
        (MappingRule::Rename, _) => Some(value),
        (MappingRule::FalseIsAbsent, Direction::Up) => (value == Value::Bool(true)).then_some(value),
        (MappingRule::FalseIsAbsent, Direction::Down) => Some(value),
        (MappingRule::EmptyIsAbsent, Direction::Up) => (!is_empty_selector(&value)).then_some(value),
        (MappingRule::EmptyIsAbsent, Direction::Down) => Some(value),
        (MappingRule::SystemNamespaces, Direction::Up) => {
            let system = value.get("system").and_then(Value::as_bool).unwrap_or(false);
            if is_empty_selector(&value) {
                system.then(|| serde_json::json!({}))
            } else {
                let mut selector = value;
                if let Some(object) = selector.as_object_mut() {
                    object.remove("system");
                }
                Some(selector)
            }
        }
        (MappingRule::SystemNamespaces, Direction::Down) => {
            let mut selector = value;
            let system = is_empty_selector(&selector);
            if let Some(object) = selector.as_object_mut() {
                object.insert("system".to_string(), Value::Bool(system));
            }
            Some(selector)
        }
        (MappingRule::SanitizeNamespaces, Direction::Up) => {
            let mut selector = value;
            for key in ["include", "exclude"] {
                if let Some(Value::Array(names)) = selector.get_mut(key) {
                    let dropped = names.len();
                    names.retain(|n| n.as_str().is_some_and(is_dns_label));
                    if names.len() != dropped {
                        debug!(list = key, dropped = dropped - names.len(), "Dropped invalid namespace names");
                    }
                }
            }
            Some(selector)
        }
        (MappingRule::SanitizeNamespaces, Direction::Down) => Some(value),
    }
}

/// Move every mapped path of a `kind` spec in `direction`
pub fn convert_spec_value(kind: &str, spec: &Value, direction: Direction) -> crate::Result<Value> {
    let mut out = spec.clone();
    for m in FIELD_MAPPINGS.iter().filter(|m| m.kind == kind) {
        let (from, to) = direction.paths(m);
        let Some(value) = take(&mut out, from) else {
            continue;
        };
        if let Some(converted) = apply_rule(m.rule, direction, value) {
            put(&mut out, to, converted)?;
        }
    }
    Ok(out)
}

// =============================================================================
// Typed conversion
// =============================================================================

fn convert_typed<From, To>(kind: &str, spec: &From, direction: Direction) -> crate::Result<To>
where
    From: serde::Serialize,
    To: serde::de::DeserializeOwned,
{
    let value = convert_spec_value(kind, &serde_json::to_value(spec)?, direction)?;
    Ok(serde_json::from_value(value)?)
}

/// Convert a v1alpha1 LogPipeline spec to the storage version
pub fn to_v1beta1(spec: &v1alpha1::LogPipelineSpec) -> crate::Result<crd::LogPipelineSpec> {
    convert_typed(LOG_PIPELINE, spec, Direction::Up)
}

/// Convert a storage-version LogPipeline spec to v1alpha1
pub fn to_v1alpha1(spec: &crd::LogPipelineSpec) -> crate::Result<v1alpha1::LogPipelineSpec> {
    convert_typed(LOG_PIPELINE, spec, Direction::Down)
}

/// Convert a v1alpha1 MetricPipeline spec to the storage version
pub fn metric_to_v1beta1(spec: &v1alpha1::MetricPipelineSpec) -> crate::Result<crd::MetricPipelineSpec> {
    convert_typed(METRIC_PIPELINE, spec, Direction::Up)
}

/// Convert a storage-version MetricPipeline spec to v1alpha1
pub fn metric_to_v1alpha1(spec: &crd::MetricPipelineSpec) -> crate::Result<v1alpha1::MetricPipelineSpec> {
    convert_typed(METRIC_PIPELINE, spec, Direction::Down)
}

/// Version part of an `apiVersion` of the conduit group
fn version_of(api_version: &str) -> crate::Result<&str> {
    match api_version.split_once('/') {
        Some((API_GROUP, version)) if matches!(version, "v1alpha1" | "v1beta1") => Ok(version),
        _ => Err(Error::validation(format!("unsupported apiVersion {api_version}"))),
    }
}

/// Convert a whole LogPipeline or MetricPipeline object to
/// `desired_api_version`.
///
/// Metadata and status are kept; the spec is normalized through the typed
/// spec of the target version.
pub fn convert_object(object: Value, desired_api_version: &str) -> crate::Result<Value> {
    let kind = object
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if kind != LOG_PIPELINE && kind != METRIC_PIPELINE {
        return Err(Error::validation(format!("kind {kind:?} has a single version")));
    }
    let current = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation("object without apiVersion"))?;
    let from = version_of(current)?.to_string();
    let to = version_of(desired_api_version)?;
    if from == to {
        return Ok(object);
    }

    let mut object = object;
    let spec = object.get("spec").cloned().unwrap_or_else(|| Value::Object(Map::new()));
    let up = to == STORAGE_VERSION;
    let converted = match (kind.as_str(), up) {
        (LOG_PIPELINE, true) => {
            let alpha: v1alpha1::LogPipelineSpec = serde_json::from_value(spec)?;
            serde_json::to_value(to_v1beta1(&alpha)?)?
        }
        (LOG_PIPELINE, false) => {
            let beta: crd::LogPipelineSpec = serde_json::from_value(spec)?;
            serde_json::to_value(to_v1alpha1(&beta)?)?
        }
        (_, true) => {
            let alpha: v1alpha1::MetricPipelineSpec = serde_json::from_value(spec)?;
            serde_json::to_value(metric_to_v1beta1(&alpha)?)?
        }
        (_, false) => {
            let beta: crd::MetricPipelineSpec = serde_json::from_value(spec)?;
            serde_json::to_value(metric_to_v1alpha1(&beta)?)?
        }
    };

    let name = object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let fields = object
        .as_object_mut()
        .ok_or_else(|| Error::validation("object is not a JSON object"))?;
    fields.insert("spec".to_string(), converted);
    fields.insert(
        "apiVersion".to_string(),
        Value::String(desired_api_version.to_string()),
    );
    debug!(pipeline = %name, %kind, %from, to, "Converted pipeline");
    Ok(object)
}

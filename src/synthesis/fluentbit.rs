//! Fluent Bit configuration for the log agent
//!
//! One base `tail` input and one `kubernetes` enrichment filter are shared by
//! every LogPipeline. Each pipeline then gets an isolated routing unit: a
//! `rewrite_tag` fan-out copying records into the pipeline's own tag, its
//! ordered [`FilterStage`] list, and exactly one output matching that tag.
//! Pipelines with runtime collection switched off keep only their output.

use std::collections::BTreeMap;

use crate::crd::{LogPipelineSpec, OtlpOutput, OutputTls, SignalSpec};
use crate::secrets::{ids, ResolvedCredentials};
use crate::Error;

use super::{env_var_name, PipelineCandidate, SynthesisOptions};

/// Main configuration file
pub const MAIN_FILE: &str = "fluent-bit.conf";
/// Per-pipeline sections, included from the main file
pub const PIPELINES_FILE: &str = "pipelines.conf";
/// Lua helpers used by the metadata and dedot stages
pub const SCRIPT_FILE: &str = "filter-script.lua";

/// Where the agent reads its configuration files
pub const CONFIG_DIR: &str = "/fluent-bit/etc";
/// Where the agent reads TLS material of outputs
pub const TLS_DIR: &str = "/fluent-bit/etc/output-tls-config";
/// Tag prefix of the shared input. Pipeline names are DNS-1123 labels and
/// cannot contain `_`, so no pipeline tag can start with it.
const BASE_TAG: &str = "kube_base";
const RETRY_LIMIT: &str = "300";
const DEFAULT_HTTP_PORT: &str = "443";
const DEFAULT_OTLP_PORT: &str = "4318";
const DEFAULT_OTLP_LOGS_URI: &str = "/v1/logs";
/// Prometheus endpoint of the agent, scraped by the self-monitor
pub const METRICS_PORT: u16 = 2020;

const FILTER_SCRIPT: &str = r#"function drop_annotations(tag, timestamp, record)
  if record.kubernetes ~= nil then
    record.kubernetes.annotations = nil
  end
  return 2, timestamp, record
end

function drop_labels(tag, timestamp, record)
  if record.kubernetes ~= nil then
    record.kubernetes.labels = nil
  end
  return 2, timestamp, record
end

local function map_keys(t)
  if t == nil then
    return
  end
  local renamed = {}
  local stale = {}
  for key, val in pairs(t) do
    local mapped = string.gsub(key, "[%/%.]", "_")
    if mapped ~= key then
      renamed[mapped] = val
      stale[key] = true
    end
  end
  for key in pairs(stale) do
    t[key] = nil
  end
  for key, val in pairs(renamed) do
    t[key] = val
  end
end

function kubernetes_map_keys(tag, timestamp, record)
  if record.kubernetes == nil then
    return 0, timestamp, record
  end
  map_keys(record.kubernetes.annotations)
  map_keys(record.kubernetes.labels)
  return 2, timestamp, record
end
"#;

// =============================================================================
// Sections
// =============================================================================

/// One `[HEADER]` block of `key value` lines.
///
/// Renders `name` first and `match` second, then the remaining keys in
/// sorted order with values aligned. Repeated keys (e.g. `header`, `rule`)
/// keep their relative order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    header: &'static str,
    entries: Vec<(String, String)>,
}

impl Section {
    /// An empty section with the given header (`SERVICE`, `INPUT`, ...)
    pub fn new(header: &'static str) -> Self {
        Self {
            header,
            entries: Vec::new(),
        }
    }

    /// Append an entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Append an entry in place
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// First value of a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render into `out`
    pub fn render(&self, out: &mut String) {
        let rank = |key: &str| match key {
            "name" => 0,
            "match" => 1,
            _ => 2,
        };
        let mut entries: Vec<&(String, String)> = self.entries.iter().collect();
        entries.sort_by(|a, b| rank(&a.0).cmp(&rank(&b.0)).then_with(|| a.0.cmp(&b.0)));

        let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0) + 1;
        out.push('[');
        out.push_str(self.header);
        out.push_str("]\n");
        for (key, value) in entries {
            out.push_str(&format!("    {key:<width$}{value}\n"));
        }
        out.push('\n');
    }
}

/// A raw section supplied by the user in `filters[].custom` or
/// `output.custom`, one `key value` pair per line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CustomSection {
    entries: Vec<(String, String)>,
}

impl CustomSection {
    /// Parse section text. Blank lines and `#` comments are skipped; keys are
    /// lowercased. A key without a value is an error.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some((key, value)) if !value.trim().is_empty() => {
                    entries.push((key.to_lowercase(), value.trim().to_string()));
                }
                _ => return Err(format!("line {}: key '{line}' has no value", index + 1)),
            }
        }
        Ok(Self { entries })
    }

    /// Plugin name from the `name` key
    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    /// First value of a key
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a key is present (case-insensitive)
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn into_section(self, header: &'static str) -> Section {
        Section {
            header,
            entries: self.entries,
        }
    }
}

// =============================================================================
// Filter stages
// =============================================================================

/// A log record as seen by the per-pipeline filter chain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogRecord {
    /// Pod namespace
    pub namespace: String,
    /// Container name
    pub container: String,
    /// Pod labels
    pub labels: BTreeMap<String, String>,
    /// Pod annotations
    pub annotations: BTreeMap<String, String>,
    /// Raw log line
    pub log: Option<String>,
    /// Fields parsed out of the log line
    pub fields: BTreeMap<String, String>,
}

/// One per-pipeline filter step.
///
/// Stages always run in declaration order of the variants, which is the order
/// [`FilterStage::for_pipeline`] returns them in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterStage {
    /// Keep records from included namespaces, drop excluded ones
    Namespaces {
        /// Allow-list, empty means all
        include: Vec<String>,
        /// Deny-list
        exclude: Vec<String>,
    },
    /// Keep records from included containers, drop excluded ones
    Containers {
        /// Allow-list, empty means all
        include: Vec<String>,
        /// Deny-list
        exclude: Vec<String>,
    },
    /// User supplied parser or regex extraction filter
    Custom(CustomSection),
    /// Label/annotation retention
    Metadata {
        /// Keep pod annotations
        keep_annotations: bool,
        /// Keep pod labels
        keep_labels: bool,
    },
    /// Replace dots and slashes in label/annotation keys
    Dedot,
    /// Drop the raw line once a structured message was extracted
    Body {
        /// Keep the raw `log` field
        keep_original: bool,
    },
}

impl FilterStage {
    /// The ordered stage list of a pipeline
    pub fn for_pipeline(spec: &LogPipelineSpec, system_namespaces: &[String]) -> Result<Vec<Self>, String> {
        let runtime = spec.runtime_input().unwrap_or_default();
        let mut stages = Vec::new();

        match &runtime.namespaces {
            Some(selector) => {
                if !selector.include.is_empty() || !selector.exclude.is_empty() {
                    stages.push(Self::Namespaces {
                        include: selector.include.clone(),
                        exclude: selector.exclude.clone(),
                    });
                }
            }
            None => stages.push(Self::Namespaces {
                include: Vec::new(),
                exclude: system_namespaces.to_vec(),
            }),
        }

        if let Some(containers) = runtime.containers.as_ref() {
            if !containers.include.is_empty() || !containers.exclude.is_empty() {
                stages.push(Self::Containers {
                    include: containers.include.clone(),
                    exclude: containers.exclude.clone(),
                });
            }
        }

        for filter in &spec.filters {
            stages.push(Self::Custom(CustomSection::parse(&filter.custom)?));
        }

        stages.push(Self::Metadata {
            keep_annotations: runtime.keep_annotations.unwrap_or(false),
            keep_labels: !runtime.drop_labels.unwrap_or(false),
        });

        if spec.output.http.as_ref().is_some_and(|h| h.dedot) {
            stages.push(Self::Dedot);
        }

        stages.push(Self::Body {
            keep_original: runtime.keep_original_body.unwrap_or(true),
        });

        Ok(stages)
    }

    /// Whether a record passes this stage. Only routing stages drop records.
    pub fn admits(&self, record: &LogRecord) -> bool {
        match self {
            Self::Namespaces { include, exclude } => selects(include, exclude, &record.namespace),
            Self::Containers { include, exclude } => selects(include, exclude, &record.container),
            Self::Custom(_) | Self::Metadata { .. } | Self::Dedot | Self::Body { .. } => true,
        }
    }

    /// Run the stage on a record, `None` when it is dropped
    pub fn apply(&self, mut record: LogRecord) -> Option<LogRecord> {
        if !self.admits(&record) {
            return None;
        }
        match self {
            Self::Metadata {
                keep_annotations,
                keep_labels,
            } => {
                if !keep_annotations {
                    record.annotations.clear();
                }
                if !keep_labels {
                    record.labels.clear();
                }
            }
            Self::Dedot => {
                record.labels = dedot(record.labels);
                record.annotations = dedot(record.annotations);
            }
            Self::Body { keep_original } => {
                if !keep_original && record.fields.contains_key("message") {
                    record.log = None;
                }
            }
            Self::Namespaces { .. } | Self::Containers { .. } | Self::Custom(_) => {}
        }
        Some(record)
    }

    /// Whether the stage decides which records reach the output
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::Namespaces { .. } | Self::Containers { .. })
    }

    fn sections(&self, pipeline: &str) -> Vec<Section> {
        let tag_match = format!("{pipeline}.*");
        let filter = || Section::new("FILTER").with("match", tag_match.as_str());
        match self {
            Self::Namespaces { include, exclude } => grep_sections(
                filter,
                &format!("{pipeline}-namespaces"),
                "$kubernetes['namespace_name']",
                include,
                exclude,
            ),
            Self::Containers { include, exclude } => grep_sections(
                filter,
                &format!("{pipeline}-containers"),
                "$kubernetes['container_name']",
                include,
                exclude,
            ),
            Self::Custom(custom) => {
                let mut section = custom.clone().into_section("FILTER");
                section.push("match", tag_match.as_str());
                vec![section]
            }
            Self::Metadata {
                keep_annotations,
                keep_labels,
            } => {
                let mut sections = Vec::new();
                if !keep_annotations {
                    sections.push(lua(filter(), "drop_annotations"));
                }
                if !keep_labels {
                    sections.push(lua(filter(), "drop_labels"));
                }
                sections
            }
            Self::Dedot => vec![lua(filter(), "kubernetes_map_keys")],
            Self::Body { keep_original } => {
                if *keep_original {
                    Vec::new()
                } else {
                    vec![filter()
                        .with("name", "modify")
                        .with("condition", "Key_exists message")
                        .with("remove", "log")]
                }
            }
        }
    }
}

fn selects(include: &[String], exclude: &[String], value: &str) -> bool {
    (include.is_empty() || include.iter().any(|v| v == value)) && !exclude.iter().any(|v| v == value)
}

fn dedot(map: BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.into_iter()
        .map(|(k, v)| (k.replace(['.', '/'], "_"), v))
        .collect()
}

fn alternation(values: &[String]) -> String {
    format!("^({})$", values.join("|"))
}

fn grep_sections(
    filter: impl Fn() -> Section,
    alias: &str,
    accessor: &str,
    include: &[String],
    exclude: &[String],
) -> Vec<Section> {
    let mut sections = Vec::new();
    if !include.is_empty() {
        sections.push(
            filter()
                .with("name", "grep")
                .with("alias", format!("{alias}-include"))
                .with("regex", format!("{accessor} {}", alternation(include))),
        );
    }
    if !exclude.is_empty() {
        sections.push(
            filter()
                .with("name", "grep")
                .with("alias", format!("{alias}-exclude"))
                .with("exclude", format!("{accessor} {}", alternation(exclude))),
        );
    }
    sections
}

fn lua(section: Section, call: &str) -> Section {
    section
        .with("name", "lua")
        .with("call", call)
        .with("script", format!("{CONFIG_DIR}/{SCRIPT_FILE}"))
}

/// A pipeline's routing unit, used to reason about which records reach its
/// output
#[derive(Clone, Debug)]
pub struct LogRoute {
    /// Pipeline name
    pub pipeline: String,
    /// Ordered stages
    pub stages: Vec<FilterStage>,
}

impl LogRoute {
    /// Push a record through every stage, `None` when any stage drops it
    pub fn process(&self, record: LogRecord) -> Option<LogRecord> {
        self.stages
            .iter()
            .try_fold(record, |record, stage| stage.apply(record))
    }
}

// =============================================================================
// Document
// =============================================================================

/// Rendered agent configuration
#[derive(Debug, Default)]
pub(super) struct FluentBitConfig {
    pub files: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub secret_files: BTreeMap<String, String>,
    pub monitor_ids: BTreeMap<String, String>,
}

/// Output alias of a pipeline, as exported in the agent's metrics labels
pub fn output_alias(name: &str, spec: &LogPipelineSpec) -> String {
    let plugin = if spec.output.http.is_some() {
        "http".to_string()
    } else if spec.output.otlp.is_some() {
        "opentelemetry".to_string()
    } else {
        spec.output
            .custom
            .as_deref()
            .and_then(|c| CustomSection::parse(c).ok())
            .and_then(|c| c.name().map(str::to_lowercase))
            .unwrap_or_else(|| "custom".to_string())
    };
    format!("{name}-{plugin}")
}

/// Name of the input a pipeline's fan-out emits into. Its record counter is
/// the pipeline's share of the tailed logs.
pub fn emitter_alias(name: &str) -> String {
    format!("{name}-emitter")
}

/// Namespaces excluded when a pipeline has no namespace selector
pub fn system_namespaces(operator_namespace: &str) -> Vec<String> {
    let mut namespaces: Vec<String> = ["kube-system", "istio-system", "compass-system", operator_namespace]
        .iter()
        .map(|s| s.to_string())
        .collect();
    namespaces.sort();
    namespaces.dedup();
    namespaces
}

fn service_section() -> Section {
    Section::new("SERVICE")
        .with("daemon", "off")
        .with("flush", "1")
        .with("health_check", "on")
        .with("hc_errors_count", "5")
        .with("hc_period", "60")
        .with("hc_retry_failure_count", "5")
        .with("http_listen", "0.0.0.0")
        .with("http_port", METRICS_PORT.to_string())
        .with("http_server", "on")
        .with("log_level", "warn")
        .with("storage.backlog.mem_limit", "5M")
        .with("storage.metrics", "on")
        .with("storage.path", "/data/flb-storage/")
}

fn base_input(options: &SynthesisOptions) -> Section {
    Section::new("INPUT")
        .with("name", "tail")
        .with("alias", BASE_TAG)
        .with("db", format!("/data/flb_{BASE_TAG}.db"))
        .with(
            "exclude_path",
            format!("/var/log/containers/*_{}_fluent-bit-*.log", options.namespace),
        )
        .with("mem_buf_limit", options.mem_buf_limit.clone())
        .with("multiline.parser", "cri")
        .with("path", "/var/log/containers/*_*_*-*.log")
        .with("read_from_head", "true")
        .with("skip_long_lines", "on")
        .with("storage.type", "filesystem")
        .with("tag", format!("{BASE_TAG}.*"))
}

fn kubernetes_filter() -> Section {
    Section::new("FILTER")
        .with("name", "kubernetes")
        .with("match", format!("{BASE_TAG}.*"))
        .with("annotations", "on")
        .with("buffer_size", "1MB")
        .with("k8s-logging.exclude", "off")
        .with("k8s-logging.parser", "on")
        .with("keep_log", "on")
        .with("kube_tag_prefix", format!("{BASE_TAG}.var.log.containers."))
        .with("labels", "on")
        .with("merge_log", "on")
}

fn rewrite_tag(name: &str, options: &SynthesisOptions) -> Section {
    Section::new("FILTER")
        .with("name", "rewrite_tag")
        .with("match", format!("{BASE_TAG}.*"))
        .with("alias", format!("{name}-rewrite-tag"))
        .with("emitter_mem_buf_limit", options.mem_buf_limit.clone())
        .with("emitter_name", emitter_alias(name))
        .with("emitter_storage.type", "filesystem")
        .with("rule", format!("$log \"^.*$\" {name}.$TAG true"))
}

/// Resolves credential fields into section values, collecting environment
/// variables and TLS files as a side effect.
struct ValueSink<'a> {
    pipeline: &'a str,
    credentials: &'a ResolvedCredentials,
    config: &'a mut FluentBitConfig,
}

impl ValueSink<'_> {
    /// Literal values render inline, secret-backed ones as `${VAR}`
    fn value(&mut self, field: &str) -> crate::Result<String> {
        let credential = self.credentials.get(field).ok_or_else(|| {
            Error::synthesis(format!("{}: credential {field} was not resolved", self.pipeline))
        })?;
        match &credential.source {
            Some(source) => {
                let var = env_var_name(&[self.pipeline, &source.namespace, &source.name, &source.key]);
                self.config.env.insert(var.clone(), credential.value.clone());
                Ok(format!("${{{var}}}"))
            }
            None => Ok(credential.value.clone()),
        }
    }

    fn env(&mut self, var: String, value: String) -> String {
        self.config.env.insert(var.clone(), value);
        format!("${{{var}}}")
    }

    fn raw(&self, field: &str) -> crate::Result<&str> {
        self.credentials.value(field).ok_or_else(|| {
            Error::synthesis(format!("{}: credential {field} was not resolved", self.pipeline))
        })
    }

    fn tls(&mut self, section: &mut Section, tls_field: &str, tls: &OutputTls) -> crate::Result<()> {
        let members = [
            ("ca", tls.has_ca(), "tls.ca_file", "ca.crt"),
            ("cert", tls.has_cert(), "tls.crt_file", "cert.crt"),
            ("key", tls.has_key(), "tls.key_file", "key.key"),
        ];
        for (member, present, key, suffix) in members {
            if !present {
                continue;
            }
            let content = self.raw(&ids::tls_member(tls_field, member))?.to_string();
            let file = format!("{}-{suffix}", self.pipeline);
            section.push(key, format!("{TLS_DIR}/{file}"));
            self.config.secret_files.insert(file, content);
        }
        Ok(())
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn output_section(
    name: &str,
    spec: &LogPipelineSpec,
    options: &SynthesisOptions,
    sink: &mut ValueSink<'_>,
) -> crate::Result<Section> {
    let mut section = if let Some(http) = &spec.output.http {
        let mut section = Section::new("OUTPUT")
            .with("name", "http")
            .with("allow_duplicated_headers", "true")
            .with("format", http.format.clone().unwrap_or_else(|| "json".to_string()))
            .with("host", sink.value(ids::HTTP_HOST)?)
            .with("port", http.port.clone().unwrap_or_else(|| DEFAULT_HTTP_PORT.to_string()))
            .with("tls", on_off(!http.tls.insecure))
            .with("tls.verify", on_off(!http.tls.insecure_skip_verify));
        if http.user.as_ref().is_some_and(|v| v.is_defined()) {
            section.push("http_user", sink.value(ids::HTTP_USER)?);
        }
        if http.password.as_ref().is_some_and(|v| v.is_defined()) {
            section.push("http_passwd", sink.value(ids::HTTP_PASSWORD)?);
        }
        if let Some(uri) = http.uri.as_deref().filter(|u| !u.is_empty()) {
            section.push("uri", uri);
        }
        if let Some(compress) = http.compress.as_deref().filter(|c| !c.is_empty()) {
            section.push("compress", compress);
        }
        sink.tls(&mut section, ids::HTTP_TLS, &http.tls)?;
        section
    } else if let Some(otlp) = &spec.output.otlp {
        otlp_output_section(name, otlp, sink)?
    } else if let Some(custom) = spec.output.custom.as_deref() {
        CustomSection::parse(custom)
            .map_err(|e| Error::synthesis(format!("{name}: custom output: {e}")))?
            .into_section("OUTPUT")
    } else {
        return Err(Error::synthesis(format!("{name}: no output defined")));
    };

    section.push("match", format!("{name}.*"));
    section.push("alias", output_alias(name, spec));
    if !section.contains("retry_limit") {
        section.push("retry_limit", RETRY_LIMIT);
    }
    section.push("storage.total_limit_size", options.fs_buffer_limit.clone());
    Ok(section)
}

/// Parts of an OTLP endpoint relevant to the Fluent Bit `opentelemetry` plugin
#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    https: bool,
    host: String,
    port: String,
}

fn split_endpoint(endpoint: &str) -> Endpoint {
    let (https, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme == "https", rest),
        None => (true, endpoint),
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        match bracketed.split_once(']') {
            Some((ip, tail)) => (format!("[{ip}]"), tail.strip_prefix(':').map(str::to_string)),
            None => (authority.to_string(), None),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), Some(port.to_string())),
            None => (authority.to_string(), None),
        }
    };
    let port = port.unwrap_or_else(|| DEFAULT_OTLP_PORT.to_string());
    Endpoint { https, host, port }
}

fn otlp_output_section(name: &str, otlp: &OtlpOutput, sink: &mut ValueSink<'_>) -> crate::Result<Section> {
    let endpoint = split_endpoint(sink.raw(ids::OTLP_ENDPOINT)?);
    let tls = otlp.tls.clone().unwrap_or_default();

    let (host, port) = if sink.credentials.is_secret(ids::OTLP_ENDPOINT) {
        let base = env_var_name(&[name, "otlp", "endpoint"]);
        (
            sink.env(format!("{base}_HOST"), endpoint.host.clone()),
            sink.env(format!("{base}_PORT"), endpoint.port.clone()),
        )
    } else {
        (endpoint.host.clone(), endpoint.port.clone())
    };

    let mut section = Section::new("OUTPUT")
        .with("name", "opentelemetry")
        .with("host", host)
        .with("port", port)
        .with(
            "logs_uri",
            otlp.path.clone().filter(|p| !p.is_empty()).unwrap_or_else(|| DEFAULT_OTLP_LOGS_URI.to_string()),
        )
        .with("tls", on_off(endpoint.https && !tls.insecure))
        .with("tls.verify", on_off(!tls.insecure_skip_verify));

    if otlp.authentication.as_ref().and_then(|a| a.basic.as_ref()).is_some() {
        section.push("http_user", sink.value(ids::OTLP_BASIC_USER)?);
        section.push("http_passwd", sink.value(ids::OTLP_BASIC_PASSWORD)?);
    }
    for (index, header) in otlp.headers.iter().enumerate() {
        let value = sink.value(&ids::otlp_header(index))?;
        let value = match header.prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{prefix} {value}"),
            None => value,
        };
        section.push("header", format!("{} {value}", header.name));
    }
    sink.tls(&mut section, ids::OTLP_TLS, &tls)?;
    Ok(section)
}

/// Render the agent configuration for the admitted pipelines, already sorted
pub(super) fn build(
    pipelines: &[&PipelineCandidate],
    options: &SynthesisOptions,
) -> crate::Result<FluentBitConfig> {
    let mut config = FluentBitConfig::default();
    let system = system_namespaces(&options.namespace);

    let mut main = String::new();
    service_section().render(&mut main);
    main.push_str(&format!("@INCLUDE {PIPELINES_FILE}\n\n"));
    base_input(options).render(&mut main);
    kubernetes_filter().render(&mut main);

    let mut units = String::new();
    for candidate in pipelines {
        let SignalSpec::Logs(spec) = &candidate.spec else {
            return Err(Error::synthesis(format!(
                "{}: not a log pipeline",
                candidate.name
            )));
        };
        let name = candidate.name.as_str();

        if spec.runtime_input().is_some() {
            rewrite_tag(name, options).render(&mut units);
            config.monitor_ids.insert(emitter_alias(name), name.to_string());
            let stages = FilterStage::for_pipeline(spec, &system)
                .map_err(|e| Error::synthesis(format!("{name}: custom filter: {e}")))?;
            for stage in &stages {
                for section in stage.sections(name) {
                    if let Some(alias) = section.get("alias").filter(|_| stage.is_routing()) {
                        config.monitor_ids.insert(alias.to_string(), name.to_string());
                    }
                    section.render(&mut units);
                }
            }
        }

        let mut sink = ValueSink {
            pipeline: name,
            credentials: &candidate.credentials,
            config: &mut config,
        };
        for variable in &spec.variables {
            let value = sink.raw(&ids::variable(&variable.name))?.to_string();
            sink.env(variable.name.clone(), value);
        }
        output_section(name, spec, options, &mut sink)?.render(&mut units);

        for file in &spec.files {
            config.files.insert(file.name.clone(), file.content.clone());
        }
        config
            .monitor_ids
            .insert(output_alias(name, spec), name.to_string());
    }

    config.files.insert(MAIN_FILE.to_string(), main);
    config.files.insert(PIPELINES_FILE.to_string(), units);
    config
        .files
        .insert(SCRIPT_FILE.to_string(), FILTER_SCRIPT.to_string());
    Ok(config)
}

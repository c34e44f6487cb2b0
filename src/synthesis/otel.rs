//! OpenTelemetry Collector configuration for the metric and trace gateways
//! and the metric agent
//!
//! Documents are assembled as JSON values whose maps are ordered, then
//! rendered to YAML, so identical inputs always produce identical bytes.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Map, Value};

use crate::crd::{AgentInput, MetricPipelineSpec, NamespaceSelector, OtlpInput, OtlpProtocol, SignalType};
use crate::secrets::{ids, ResolvedCredentials};
use crate::{Error, METRIC_GATEWAY_NAME};

use super::{env_var_name, PipelineCandidate, SynthesisOptions};

/// Gateway configuration file
pub const GATEWAY_FILE: &str = "gateway.yaml";
/// Metric agent configuration file
pub const AGENT_FILE: &str = "agent.yaml";

/// Batches kept in memory across all exporters of a gateway
pub const MAX_QUEUE_SIZE: usize = 256;
/// Port of the collector's own Prometheus endpoint
pub const METRICS_PORT: u16 = 8888;
/// OTLP/gRPC receiver port
pub const OTLP_GRPC_PORT: u16 = 4317;
/// OTLP/HTTP receiver port
pub const OTLP_HTTP_PORT: u16 = 4318;

/// Resource attribute set by the metric agent to mark where data came from
pub const INPUT_SOURCE_ATTRIBUTE: &str = "conduit.input.source";
const NAMESPACE_ATTRIBUTE: &str = r#"resource.attributes["k8s.namespace.name"]"#;

/// Rendered collector configuration
#[derive(Debug, Default)]
pub(super) struct OtelConfig {
    pub files: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub monitor_ids: BTreeMap<String, String>,
}

/// Exporter id of a pipeline, as found in `exporter` metric labels
pub fn exporter_id(name: &str, protocol: OtlpProtocol) -> String {
    match protocol {
        OtlpProtocol::Grpc => format!("otlp/{name}"),
        OtlpProtocol::Http => format!("otlphttp/{name}"),
    }
}

fn env_ref(var: &str) -> String {
    format!("${{env:{var}}}")
}

fn missing(pipeline: &str, field: &str) -> Error {
    Error::synthesis(format!("{pipeline}: credential {field} was not resolved"))
}

fn value<'a>(pipeline: &str, credentials: &'a ResolvedCredentials, field: &str) -> crate::Result<&'a str> {
    credentials.value(field).ok_or_else(|| missing(pipeline, field))
}

fn base_sections() -> (Value, Value, Value) {
    let extensions = json!({
        "health_check": { "endpoint": "${env:MY_POD_IP}:13133" },
    });
    let processors = json!({
        "memory_limiter": {
            "check_interval": "1s",
            "limit_percentage": 75,
            "spike_limit_percentage": 15,
        },
        "batch": {
            "send_batch_size": 512,
            "send_batch_max_size": 512,
            "timeout": "10s",
        },
    });
    let telemetry = json!({
        "metrics": {
            "readers": [{
                "pull": {
                    "exporter": {
                        "prometheus": { "host": "${env:MY_POD_IP}", "port": METRICS_PORT }
                    }
                }
            }]
        },
        "logs": { "level": "info", "encoding": "json" },
    });
    (extensions, processors, telemetry)
}

fn exporter(
    signal: SignalType,
    candidate: &PipelineCandidate,
    queue_size: usize,
    env: &mut BTreeMap<String, String>,
) -> crate::Result<(String, Value)> {
    let name = candidate.name.as_str();
    let otlp = candidate
        .spec
        .otlp_output()
        .ok_or_else(|| Error::synthesis(format!("{name}: no OTLP output defined")))?;
    let credentials = &candidate.credentials;
    let suffix = env_var_name(&[name]);

    let mut endpoint = value(name, credentials, ids::OTLP_ENDPOINT)?.to_string();
    let plain_text = endpoint.starts_with("http://");
    let path = otlp.path.as_deref().filter(|p| !p.is_empty());
    let endpoint_key = match (otlp.protocol, path) {
        (OtlpProtocol::Http, Some(path)) => {
            endpoint = format!("{}/{}", endpoint.trim_end_matches('/'), path.trim_start_matches('/'));
            format!("{}_endpoint", signal.as_str())
        }
        _ => "endpoint".to_string(),
    };
    let endpoint_var = format!("OTLP_ENDPOINT_{suffix}");
    env.insert(endpoint_var.clone(), endpoint);

    let mut headers = Map::new();
    if otlp.authentication.as_ref().and_then(|a| a.basic.as_ref()).is_some() {
        let user = value(name, credentials, ids::OTLP_BASIC_USER)?;
        let password = value(name, credentials, ids::OTLP_BASIC_PASSWORD)?;
        let var = format!("BASIC_AUTH_HEADER_{suffix}");
        env.insert(
            var.clone(),
            format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))),
        );
        headers.insert("Authorization".to_string(), Value::String(env_ref(&var)));
    }
    for (index, header) in otlp.headers.iter().enumerate() {
        let raw = value(name, credentials, &ids::otlp_header(index))?;
        let var = format!("HEADER_{suffix}_{}", env_var_name(&[&header.name]));
        let rendered = match header.prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{prefix} {raw}"),
            None => raw.to_string(),
        };
        env.insert(var.clone(), rendered);
        headers.insert(header.name.clone(), Value::String(env_ref(&var)));
    }

    let tls_spec = otlp.tls.clone().unwrap_or_default();
    let mut tls = Map::new();
    tls.insert(
        "insecure".to_string(),
        Value::Bool(tls_spec.insecure || (plain_text && otlp.protocol == OtlpProtocol::Grpc)),
    );
    tls.insert(
        "insecure_skip_verify".to_string(),
        Value::Bool(tls_spec.insecure_skip_verify),
    );
    let members = [
        ("ca", tls_spec.has_ca(), "ca_pem", "CA"),
        ("cert", tls_spec.has_cert(), "cert_pem", "CERT"),
        ("key", tls_spec.has_key(), "key_pem", "KEY"),
    ];
    for (member, present, key, label) in members {
        if present {
            let pem = value(name, credentials, &ids::tls_member(ids::OTLP_TLS, member))?;
            let var = format!("OTLP_TLS_{label}_PEM_{suffix}");
            env.insert(var.clone(), pem.to_string());
            tls.insert(key.to_string(), Value::String(env_ref(&var)));
        }
    }

    let mut config = Map::new();
    config.insert(endpoint_key, Value::String(env_ref(&endpoint_var)));
    if !headers.is_empty() {
        config.insert("headers".to_string(), Value::Object(headers));
    }
    config.insert("tls".to_string(), Value::Object(tls));
    config.insert(
        "sending_queue".to_string(),
        json!({ "enabled": true, "queue_size": queue_size }),
    );
    config.insert(
        "retry_on_failure".to_string(),
        json!({
            "enabled": true,
            "initial_interval": "5s",
            "max_interval": "30s",
            "max_elapsed_time": "300s",
        }),
    );

    Ok((exporter_id(name, otlp.protocol), Value::Object(config)))
}

/// OTTL condition matching data from namespaces a selector does not select
fn namespace_drop_condition(selector: &NamespaceSelector) -> Option<String> {
    let alternation = |values: &[String]| format!("^({})$", values.join("|"));
    let mut parts = Vec::new();
    if !selector.include.is_empty() {
        parts.push(format!(
            "not(IsMatch({NAMESPACE_ATTRIBUTE}, \"{}\"))",
            alternation(&selector.include)
        ));
    }
    if !selector.exclude.is_empty() {
        parts.push(format!(
            "IsMatch({NAMESPACE_ATTRIBUTE}, \"{}\")",
            alternation(&selector.exclude)
        ));
    }
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("({})", parts.join(" or "))),
    }
}

fn source_is(source: &str) -> String {
    format!("resource.attributes[\"{INPUT_SOURCE_ATTRIBUTE}\"] == \"{source}\"")
}

/// Conditions dropping data a metric pipeline did not ask for
fn metric_input_drop_conditions(spec: &MetricPipelineSpec, system: &NamespaceSelector) -> Vec<String> {
    let mut conditions = Vec::new();

    let agent_inputs: [(&str, &Option<AgentInput>); 3] = [
        ("prometheus", &spec.input.prometheus),
        ("runtime", &spec.input.runtime),
        ("istio", &spec.input.istio),
    ];
    for (source, input) in agent_inputs {
        match input.as_ref().filter(|i| i.enabled) {
            None => conditions.push(source_is(source)),
            Some(input) => {
                let selector = input.namespaces.as_ref().unwrap_or(system);
                if let Some(cond) = namespace_drop_condition(selector) {
                    conditions.push(format!("{} and {cond}", source_is(source)));
                }
            }
        }
    }

    let pushed = format!("resource.attributes[\"{INPUT_SOURCE_ATTRIBUTE}\"] == nil");
    let otlp: OtlpInput = spec.input.otlp.clone().unwrap_or_default();
    if otlp.disabled {
        conditions.push(pushed);
    } else if let Some(cond) = otlp.namespaces.as_ref().and_then(namespace_drop_condition) {
        conditions.push(format!("{pushed} and {cond}"));
    }

    conditions
}

fn signal_key(signal: SignalType) -> crate::Result<&'static str> {
    match signal {
        SignalType::Metrics => Ok("metrics"),
        SignalType::Traces => Ok("traces"),
        SignalType::Logs => Err(Error::synthesis("logs are not routed through an OTel gateway")),
    }
}

/// Render the gateway configuration for the admitted pipelines, already
/// sorted. Without pipelines the gateway routes to a `nop` exporter.
pub(super) fn build_gateway(
    signal: SignalType,
    pipelines: &[&PipelineCandidate],
    options: &SynthesisOptions,
) -> crate::Result<OtelConfig> {
    let key = signal_key(signal)?;
    let mut config = OtelConfig::default();
    let (extensions, mut processors, telemetry) = base_sections();

    let mut exporters = Map::new();
    let mut service_pipelines = Map::new();
    let system = NamespaceSelector {
        include: Vec::new(),
        exclude: super::fluentbit::system_namespaces(&options.namespace),
    };

    if pipelines.is_empty() {
        exporters.insert("nop".to_string(), json!({}));
        service_pipelines.insert(
            format!("{key}/nop"),
            json!({
                "receivers": ["otlp"],
                "processors": ["memory_limiter", "batch"],
                "exporters": ["nop"],
            }),
        );
    }

    let queue_size = MAX_QUEUE_SIZE / pipelines.len().max(1);
    for candidate in pipelines {
        let name = candidate.name.as_str();
        let (exporter_id, exporter_config) = exporter(signal, candidate, queue_size, &mut config.env)?;
        exporters.insert(exporter_id.clone(), exporter_config);
        config.monitor_ids.insert(exporter_id.clone(), name.to_string());

        let mut pipeline_processors = vec![Value::from("memory_limiter")];
        if let crate::crd::SignalSpec::Metrics(spec) = &candidate.spec {
            let conditions = metric_input_drop_conditions(spec, &system);
            if !conditions.is_empty() {
                let id = format!("filter/{name}-inputs");
                if let Value::Object(map) = &mut processors {
                    map.insert(
                        id.clone(),
                        json!({
                            "error_mode": "ignore",
                            "metrics": { "metric": conditions },
                        }),
                    );
                }
                pipeline_processors.push(Value::String(id));
            }
        }
        pipeline_processors.push(Value::from("batch"));

        service_pipelines.insert(
            format!("{key}/{name}"),
            json!({
                "receivers": ["otlp"],
                "processors": pipeline_processors,
                "exporters": [exporter_id],
            }),
        );
    }

    let document = json!({
        "extensions": extensions,
        "receivers": {
            "otlp": {
                "protocols": {
                    "grpc": { "endpoint": format!("${{env:MY_POD_IP}}:{OTLP_GRPC_PORT}") },
                    "http": { "endpoint": format!("${{env:MY_POD_IP}}:{OTLP_HTTP_PORT}") },
                }
            }
        },
        "processors": processors,
        "exporters": exporters,
        "service": {
            "extensions": ["health_check"],
            "pipelines": service_pipelines,
            "telemetry": telemetry,
        },
    });
    config
        .files
        .insert(GATEWAY_FILE.to_string(), serde_yaml::to_string(&document)?);
    Ok(config)
}

fn app_pods_receiver() -> Value {
    json!({
        "config": {
            "scrape_configs": [{
                "job_name": "app-pods",
                "scrape_interval": "30s",
                "kubernetes_sd_configs": [{
                    "role": "pod",
                    "selectors": [{ "role": "pod", "field": "spec.nodeName=${env:MY_NODE_NAME}" }],
                }],
                "relabel_configs": [
                    {
                        "source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_scrape"],
                        "action": "keep",
                        "regex": "true",
                    },
                    {
                        "source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_path"],
                        "action": "replace",
                        "target_label": "__metrics_path__",
                        "regex": "(.+)",
                    },
                    {
                        "source_labels": ["__meta_kubernetes_namespace"],
                        "action": "replace",
                        "target_label": "namespace",
                    },
                ],
            }]
        }
    })
}

fn istio_receiver() -> Value {
    json!({
        "config": {
            "scrape_configs": [{
                "job_name": "istio-proxy",
                "scrape_interval": "30s",
                "metrics_path": "/stats/prometheus",
                "kubernetes_sd_configs": [{
                    "role": "pod",
                    "selectors": [{ "role": "pod", "field": "spec.nodeName=${env:MY_NODE_NAME}" }],
                }],
                "relabel_configs": [
                    {
                        "source_labels": ["__meta_kubernetes_pod_container_name"],
                        "action": "keep",
                        "regex": "istio-proxy",
                    },
                    {
                        "source_labels": ["__meta_kubernetes_pod_container_port_name"],
                        "action": "keep",
                        "regex": "http-envoy-prom",
                    },
                ],
            }]
        }
    })
}

fn kubeletstats_receiver() -> Value {
    json!({
        "collection_interval": "30s",
        "auth_type": "serviceAccount",
        "endpoint": "https://${env:MY_NODE_NAME}:10250",
        "insecure_skip_verify": true,
        "metric_groups": ["container", "pod"],
    })
}

/// Render the metric agent configuration, or `None` when no admitted
/// pipeline enables a pull-based input.
pub(super) fn build_metric_agent(
    pipelines: &[&PipelineCandidate],
    options: &SynthesisOptions,
) -> crate::Result<Option<String>> {
    let specs: Vec<&MetricPipelineSpec> = pipelines
        .iter()
        .filter_map(|c| match &c.spec {
            crate::crd::SignalSpec::Metrics(spec) => Some(spec),
            _ => None,
        })
        .collect();
    type Receiver = fn() -> Value;
    let inputs: [(&str, &str, bool, Receiver); 3] = [
        (
            "prometheus",
            "prometheus/app-pods",
            specs.iter().any(|s| s.prometheus_enabled()),
            app_pods_receiver,
        ),
        (
            "runtime",
            "kubeletstats",
            specs.iter().any(|s| s.runtime_enabled()),
            kubeletstats_receiver,
        ),
        (
            "istio",
            "prometheus/istio",
            specs.iter().any(|s| s.istio_enabled()),
            istio_receiver,
        ),
    ];
    if !inputs.iter().any(|(_, _, enabled, _)| *enabled) {
        return Ok(None);
    }

    let (extensions, mut processors, telemetry) = base_sections();
    let mut receivers = Map::new();
    let mut service_pipelines = Map::new();
    for (source, receiver_id, enabled, receiver) in inputs {
        if !enabled {
            continue;
        }
        receivers.insert(receiver_id.to_string(), receiver());
        let resource_id = format!("resource/{source}");
        if let Value::Object(map) = &mut processors {
            map.insert(
                resource_id.clone(),
                json!({
                    "attributes": [{
                        "action": "insert",
                        "key": INPUT_SOURCE_ATTRIBUTE,
                        "value": source,
                    }]
                }),
            );
        }
        service_pipelines.insert(
            format!("metrics/{source}"),
            json!({
                "receivers": [receiver_id],
                "processors": ["memory_limiter", resource_id, "batch"],
                "exporters": ["otlp"],
            }),
        );
    }

    let document = json!({
        "extensions": extensions,
        "receivers": receivers,
        "processors": processors,
        "exporters": {
            "otlp": {
                "endpoint": format!("{METRIC_GATEWAY_NAME}.{}:{OTLP_GRPC_PORT}", options.namespace),
                "tls": { "insecure": true },
                "sending_queue": { "enabled": true, "queue_size": MAX_QUEUE_SIZE },
                "retry_on_failure": {
                    "enabled": true,
                    "initial_interval": "5s",
                    "max_interval": "30s",
                    "max_elapsed_time": "300s",
                },
            }
        },
        "service": {
            "extensions": ["health_check"],
            "pipelines": service_pipelines,
            "telemetry": telemetry,
        },
    });
    Ok(Some(serde_yaml::to_string(&document)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AuthenticationOptions, BasicAuth, Header, MetricPipelineInput, MetricPipelineOutput,
        OtlpOutput, SignalSpec, TracePipelineOutput, TracePipelineSpec, ValueType,
    };

    fn options() -> SynthesisOptions {
        SynthesisOptions::new("conduit-system")
    }

    fn trace_candidate(name: &str, endpoint: &str) -> PipelineCandidate {
        PipelineCandidate {
            name: name.to_string(),
            created: None,
            spec: SignalSpec::Traces(TracePipelineSpec {
                output: TracePipelineOutput {
                    otlp: Some(OtlpOutput {
                        endpoint: ValueType::literal(endpoint),
                        ..Default::default()
                    }),
                },
            }),
            credentials: ResolvedCredentials::from_values([(ids::OTLP_ENDPOINT, endpoint)]),
        }
    }

    fn parse(config: &OtelConfig, file: &str) -> serde_yaml::Value {
        serde_yaml::from_str(config.files.get(file).unwrap()).unwrap()
    }

    #[test]
    fn test_zero_pipelines_route_to_nop() {
        let config = build_gateway(SignalType::Traces, &[], &options()).unwrap();
        let doc = parse(&config, GATEWAY_FILE);
        assert!(doc["exporters"]["nop"].is_mapping());
        assert_eq!(
            doc["service"]["pipelines"]["traces/nop"]["exporters"][0].as_str(),
            Some("nop")
        );
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_queue_is_split_across_pipelines() {
        let a = trace_candidate("a", "http://jaeger:4317");
        let b = trace_candidate("b", "https://backend:4317");
        let config = build_gateway(SignalType::Traces, &[&a, &b], &options()).unwrap();
        let doc = parse(&config, GATEWAY_FILE);

        assert_eq!(doc["exporters"]["otlp/a"]["sending_queue"]["queue_size"].as_u64(), Some(128));
        assert_eq!(doc["exporters"]["otlp/a"]["endpoint"].as_str(), Some("${env:OTLP_ENDPOINT_A}"));
        // Plain-text gRPC endpoints switch TLS off
        assert_eq!(doc["exporters"]["otlp/a"]["tls"]["insecure"].as_bool(), Some(true));
        assert_eq!(doc["exporters"]["otlp/b"]["tls"]["insecure"].as_bool(), Some(false));
        assert_eq!(
            config.env.get("OTLP_ENDPOINT_B").map(String::as_str),
            Some("https://backend:4317")
        );
        assert_eq!(config.monitor_ids.get("otlp/b").map(String::as_str), Some("b"));
    }

    #[test]
    fn test_http_exporter_with_path_and_auth() {
        let mut candidate = trace_candidate("jaeger", "https://backend:4318/");
        if let SignalSpec::Traces(spec) = &mut candidate.spec {
            let otlp = spec.output.otlp.as_mut().unwrap();
            otlp.protocol = OtlpProtocol::Http;
            otlp.path = Some("/v1/traces".to_string());
            otlp.authentication = Some(AuthenticationOptions {
                basic: Some(BasicAuth {
                    user: ValueType::literal("user"),
                    password: ValueType::literal("pass"),
                }),
            });
            otlp.headers = vec![Header {
                name: "X-Tenant".to_string(),
                prefix: Some("Org".to_string()),
                value: ValueType::literal("team-a"),
            }];
        }
        candidate.credentials = ResolvedCredentials::from_values([
            (ids::OTLP_ENDPOINT.to_string(), "https://backend:4318/".to_string()),
            (ids::OTLP_BASIC_USER.to_string(), "user".to_string()),
            (ids::OTLP_BASIC_PASSWORD.to_string(), "pass".to_string()),
            (ids::otlp_header(0), "team-a".to_string()),
        ]);

        let config = build_gateway(SignalType::Traces, &[&candidate], &options()).unwrap();
        let doc = parse(&config, GATEWAY_FILE);
        let exporter = &doc["exporters"]["otlphttp/jaeger"];

        assert_eq!(exporter["traces_endpoint"].as_str(), Some("${env:OTLP_ENDPOINT_JAEGER}"));
        assert_eq!(
            config.env.get("OTLP_ENDPOINT_JAEGER").map(String::as_str),
            Some("https://backend:4318/v1/traces")
        );
        assert_eq!(
            config.env.get("BASIC_AUTH_HEADER_JAEGER").map(String::as_str),
            Some("Basic dXNlcjpwYXNz")
        );
        assert_eq!(
            config.env.get("HEADER_JAEGER_X_TENANT").map(String::as_str),
            Some("Org team-a")
        );
        assert_eq!(
            exporter["headers"]["Authorization"].as_str(),
            Some("${env:BASIC_AUTH_HEADER_JAEGER}")
        );
    }

    #[test]
    fn test_missing_credential_is_a_synthesis_error() {
        let mut candidate = trace_candidate("a", "http://jaeger:4317");
        candidate.credentials = ResolvedCredentials::default();
        let err = build_gateway(SignalType::Traces, &[&candidate], &options()).unwrap_err();
        assert!(matches!(err, Error::Synthesis(_)));
        assert!(!err.is_retryable());
    }

    fn metric_candidate(name: &str, input: MetricPipelineInput) -> PipelineCandidate {
        PipelineCandidate {
            name: name.to_string(),
            created: None,
            spec: SignalSpec::Metrics(MetricPipelineSpec {
                input,
                output: MetricPipelineOutput {
                    otlp: Some(OtlpOutput {
                        endpoint: ValueType::literal("http://prom:4317"),
                        ..Default::default()
                    }),
                },
            }),
            credentials: ResolvedCredentials::from_values([(ids::OTLP_ENDPOINT, "http://prom:4317")]),
        }
    }

    #[test]
    fn test_metric_input_filters() {
        let system = NamespaceSelector {
            include: vec![],
            exclude: vec!["kube-system".to_string()],
        };
        let spec = MetricPipelineSpec {
            input: MetricPipelineInput {
                prometheus: Some(AgentInput {
                    enabled: true,
                    namespaces: None,
                }),
                otlp: Some(OtlpInput {
                    disabled: false,
                    namespaces: Some(NamespaceSelector {
                        include: vec!["shop".to_string()],
                        exclude: vec![],
                    }),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let conditions = metric_input_drop_conditions(&spec, &system);
        assert_eq!(
            conditions,
            vec![
                r#"resource.attributes["conduit.input.source"] == "prometheus" and IsMatch(resource.attributes["k8s.namespace.name"], "^(kube-system)$")"#,
                r#"resource.attributes["conduit.input.source"] == "runtime""#,
                r#"resource.attributes["conduit.input.source"] == "istio""#,
                r#"resource.attributes["conduit.input.source"] == nil and not(IsMatch(resource.attributes["k8s.namespace.name"], "^(shop)$"))"#,
            ]
        );
    }

    #[test]
    fn test_metric_agent_only_when_pull_inputs_enabled() {
        let otlp_only = metric_candidate("push", MetricPipelineInput::default());
        assert!(build_metric_agent(&[&otlp_only], &options()).unwrap().is_none());

        let runtime = metric_candidate(
            "runtime",
            MetricPipelineInput {
                runtime: Some(AgentInput {
                    enabled: true,
                    namespaces: None,
                }),
                ..Default::default()
            },
        );
        let agent = build_metric_agent(&[&otlp_only, &runtime], &options())
            .unwrap()
            .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&agent).unwrap();
        assert!(doc["receivers"]["kubeletstats"].is_mapping());
        assert!(doc["receivers"]["prometheus/app-pods"].is_null());
        assert_eq!(
            doc["exporters"]["otlp"]["endpoint"].as_str(),
            Some("conduit-metric-gateway.conduit-system:4317")
        );
    }
}

//! Workload types for the collectors
//!
//! This module defines the Kubernetes objects a collector needs and compiles
//! them from an applied [`CollectorConfigDocument`]:
//! - ConfigMap: rendered configuration files
//! - Secret: credential env vars and TLS files
//! - DaemonSet: per-node agents (log agent, metric agent)
//! - Deployment: centrally scaled gateways
//! - Service: OTLP ingress of gateways and the metrics port scraped by the
//!   self-monitor
//!
//! The pod template carries the document fingerprint as an annotation, so a
//! changed document rolls the pods and an unchanged one leaves them alone.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crd::SignalType;
use crate::selfmonitor::metrics_service_name;
use crate::synthesis::{fluentbit, otel, CollectorConfigDocument};
use crate::{LOG_AGENT_NAME, METRIC_AGENT_NAME, METRIC_GATEWAY_NAME, TRACE_GATEWAY_NAME};

/// Pod template annotation holding the applied document fingerprint
pub const CONFIG_FINGERPRINT_ANNOTATION: &str = "telemetry.conduit.dev/config-fingerprint";

const NAME_LABEL: &str = "app.kubernetes.io/name";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

// =============================================================================
// Kubernetes Resource Types
// =============================================================================

/// Standard Kubernetes ObjectMeta
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Create new metadata with standard conduit labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert(NAME_LABEL.to_string(), name.clone());
        labels.insert(MANAGED_BY_LABEL.to_string(), "conduit".to_string());
        Self {
            name,
            namespace: namespace.into(),
            labels,
            annotations: BTreeMap::new(),
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Kubernetes ConfigMap
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// File name -> content
    pub data: BTreeMap<String, String>,
}

/// Kubernetes Secret, with base64-encoded data
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Key -> base64 value
    pub data: BTreeMap<String, String>,
}

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DeploymentSpec,
}

/// Deployment spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas
    pub replicas: i32,
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Kubernetes DaemonSet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSet {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DaemonSetSpec,
}

/// DaemonSet spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetSpec {
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Label selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (labels and annotations only)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers
    pub containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

/// Container spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Single environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Environment imported from whole objects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Environment variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Downward API source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

/// Source of an environment variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Downward API field reference
    pub field_ref: FieldRef,
}

/// Downward API field reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    /// Field path, e.g. `status.podIP`
    pub field_path: String,
}

/// Import all keys of a Secret as environment variables
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    /// Secret reference
    pub secret_ref: NameRef,
}

/// Reference by name
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NameRef {
    /// Object name
    pub name: String,
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    pub name: String,
    /// Container port number
    pub container_port: u16,
}

/// Volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// ConfigMap source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<NameRef>,
    /// Secret source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
    /// Host path source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
}

/// Secret volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    /// Secret name
    pub secret_name: String,
}

/// Host path volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostPathVolumeSource {
    /// Path on the node
    pub path: String,
}

/// Volume mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path
    pub mount_path: String,
    /// Read only
    #[serde(default)]
    pub read_only: bool,
}

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Pod selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    pub ports: Vec<ServicePort>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    pub name: String,
    /// Service port
    pub port: u16,
    /// Target port
    pub target_port: u16,
}

// =============================================================================
// Collector roles
// =============================================================================

/// A collector workload and what it runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectorRole {
    /// Fluent Bit DaemonSet shipping container logs
    LogAgent,
    /// OTel Collector DaemonSet scraping node-local metric sources
    MetricAgent,
    /// OTel Collector Deployment routing metrics
    MetricGateway,
    /// OTel Collector Deployment routing traces
    TraceGateway,
}

impl CollectorRole {
    /// Object name of the workload
    pub fn name(&self) -> &'static str {
        match self {
            Self::LogAgent => LOG_AGENT_NAME,
            Self::MetricAgent => METRIC_AGENT_NAME,
            Self::MetricGateway => METRIC_GATEWAY_NAME,
            Self::TraceGateway => TRACE_GATEWAY_NAME,
        }
    }

    /// Whether the workload runs on every node
    pub fn is_agent(&self) -> bool {
        matches!(self, Self::LogAgent | Self::MetricAgent)
    }

    /// Signal type served
    pub fn signal(&self) -> SignalType {
        match self {
            Self::LogAgent => SignalType::Logs,
            Self::MetricAgent | Self::MetricGateway => SignalType::Metrics,
            Self::TraceGateway => SignalType::Traces,
        }
    }

    /// Roles needed to run `document`
    pub fn for_document(document: &CollectorConfigDocument) -> Vec<Self> {
        match document.signal() {
            SignalType::Logs => vec![Self::LogAgent],
            SignalType::Metrics if document.file(otel::AGENT_FILE).is_some() => {
                vec![Self::MetricGateway, Self::MetricAgent]
            }
            SignalType::Metrics => vec![Self::MetricGateway],
            SignalType::Traces => vec![Self::TraceGateway],
        }
    }

    fn component(&self) -> &'static str {
        if self.is_agent() {
            "agent"
        } else {
            "gateway"
        }
    }
}

// =============================================================================
// Generated Workloads Container
// =============================================================================

/// Everything needed to run the collectors of one signal type
#[derive(Clone, Debug, Default)]
pub struct CollectorWorkloads {
    /// Configuration files
    pub config_maps: Vec<ConfigMap>,
    /// Credentials
    pub secrets: Vec<Secret>,
    /// Agents
    pub daemon_sets: Vec<DaemonSet>,
    /// Gateways
    pub deployments: Vec<Deployment>,
    /// OTLP and metrics services
    pub services: Vec<Service>,
}

impl CollectorWorkloads {
    /// Create empty workload collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if any workloads were generated
    pub fn is_empty(&self) -> bool {
        self.config_maps.is_empty()
            && self.secrets.is_empty()
            && self.daemon_sets.is_empty()
            && self.deployments.is_empty()
            && self.services.is_empty()
    }
}

/// Inputs to the compiler that do not come from the document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Namespace of all objects
    pub namespace: String,
    /// Fluent Bit image
    pub fluent_bit_image: String,
    /// OTel Collector image
    pub otel_collector_image: String,
    /// Replicas of the gateway, when the document needs one
    pub gateway_replicas: i32,
}

// =============================================================================
// Workload Compiler
// =============================================================================

/// Compiler for the Kubernetes objects running a collector configuration
///
/// This compiler generates:
/// - ConfigMap with every configuration file (always)
/// - `<name>-env` Secret with credential env vars (always, possibly empty)
/// - `<name>-tls` Secret with TLS files (log agent only)
/// - DaemonSet per agent role, Deployment per gateway role
/// - `<name>-metrics` Service per role for the self-monitor, and an OTLP
///   Service per gateway
pub struct WorkloadCompiler;

impl WorkloadCompiler {
    /// Compile the objects running `document`
    pub fn compile(document: &CollectorConfigDocument, settings: &CollectorSettings) -> CollectorWorkloads {
        let mut output = CollectorWorkloads::new();
        let ns = settings.namespace.as_str();

        for role in CollectorRole::for_document(document) {
            let name = role.name();
            let meta = ObjectMeta::new(name, ns).with_label(COMPONENT_LABEL, role.component());

            output.config_maps.push(ConfigMap {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
                metadata: meta.clone(),
                data: Self::config_files(role, document),
            });
            output.secrets.push(Self::secret(format!("{name}-env"), ns, document.env()));
            if role == CollectorRole::LogAgent {
                output
                    .secrets
                    .push(Self::secret(format!("{name}-tls"), ns, document.secret_files()));
            }

            let template = Self::pod_template(role, document, settings);
            let selector = LabelSelector {
                match_labels: BTreeMap::from([(NAME_LABEL.to_string(), name.to_string())]),
            };
            if role.is_agent() {
                output.daemon_sets.push(DaemonSet {
                    api_version: "apps/v1".to_string(),
                    kind: "DaemonSet".to_string(),
                    metadata: meta,
                    spec: DaemonSetSpec { selector, template },
                });
            } else {
                output.deployments.push(Deployment {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    metadata: meta,
                    spec: DeploymentSpec {
                        replicas: settings.gateway_replicas,
                        selector,
                        template,
                    },
                });
                output.services.push(Self::service(
                    name.to_string(),
                    ns,
                    name,
                    vec![
                        Self::port("grpc-otlp", otel::OTLP_GRPC_PORT),
                        Self::port("http-otlp", otel::OTLP_HTTP_PORT),
                    ],
                ));
            }

            if role != CollectorRole::MetricAgent {
                let metrics_port = match role {
                    CollectorRole::LogAgent => fluentbit::METRICS_PORT,
                    _ => otel::METRICS_PORT,
                };
                output.services.push(Self::service(
                    metrics_service_name(role.signal()),
                    ns,
                    name,
                    vec![Self::port("http-metrics", metrics_port)],
                ));
            }
        }

        output
    }

    fn config_files(role: CollectorRole, document: &CollectorConfigDocument) -> BTreeMap<String, String> {
        match role {
            CollectorRole::LogAgent => document.files().clone(),
            CollectorRole::MetricAgent => document
                .files()
                .iter()
                .filter(|(name, _)| name.as_str() == otel::AGENT_FILE)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            CollectorRole::MetricGateway | CollectorRole::TraceGateway => document
                .files()
                .iter()
                .filter(|(name, _)| name.as_str() == otel::GATEWAY_FILE)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn secret(name: String, namespace: &str, entries: &BTreeMap<String, String>) -> Secret {
        Secret {
            api_version: "v1".to_string(),
            kind: "Secret".to_string(),
            metadata: ObjectMeta::new(name, namespace),
            data: entries
                .iter()
                .map(|(k, v)| (k.clone(), BASE64.encode(v.as_bytes())))
                .collect(),
        }
    }

    fn port(name: &str, port: u16) -> ServicePort {
        ServicePort {
            name: name.to_string(),
            port,
            target_port: port,
        }
    }

    fn service(name: String, namespace: &str, workload: &str, ports: Vec<ServicePort>) -> Service {
        Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata: ObjectMeta::new(name, namespace),
            spec: ServiceSpec {
                selector: BTreeMap::from([(NAME_LABEL.to_string(), workload.to_string())]),
                ports,
            },
        }
    }

    fn volume(name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            config_map: None,
            secret: None,
            host_path: None,
        }
    }

    fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
        VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            read_only,
        }
    }

    fn downward(name: &str, field_path: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: FieldRef {
                    field_path: field_path.to_string(),
                },
            }),
        }
    }

    fn pod_template(
        role: CollectorRole,
        document: &CollectorConfigDocument,
        settings: &CollectorSettings,
    ) -> PodTemplateSpec {
        let name = role.name();
        let labels = BTreeMap::from([
            (NAME_LABEL.to_string(), name.to_string()),
            (MANAGED_BY_LABEL.to_string(), "conduit".to_string()),
            (COMPONENT_LABEL.to_string(), role.component().to_string()),
        ]);
        let annotations = BTreeMap::from([(
            CONFIG_FINGERPRINT_ANNOTATION.to_string(),
            document.fingerprint().to_string(),
        )]);

        let env_from = vec![EnvFromSource {
            secret_ref: NameRef {
                name: format!("{name}-env"),
            },
        }];

        let mut config = Self::volume("config");
        config.config_map = Some(NameRef {
            name: name.to_string(),
        });

        let (container, volumes) = match role {
            CollectorRole::LogAgent => {
                let mut tls = Self::volume("output-tls");
                tls.secret = Some(SecretVolumeSource {
                    secret_name: format!("{name}-tls"),
                });
                let mut varlog = Self::volume("varlog");
                varlog.host_path = Some(HostPathVolumeSource {
                    path: "/var/log".to_string(),
                });
                let mut data = Self::volume("data");
                data.host_path = Some(HostPathVolumeSource {
                    path: "/var/fluent-bit".to_string(),
                });

                let container = Container {
                    name: "fluent-bit".to_string(),
                    image: settings.fluent_bit_image.clone(),
                    args: vec![
                        "--config".to_string(),
                        format!("{}/{}", fluentbit::CONFIG_DIR, fluentbit::MAIN_FILE),
                    ],
                    env: vec![],
                    env_from,
                    ports: vec![ContainerPort {
                        name: "http-metrics".to_string(),
                        container_port: fluentbit::METRICS_PORT,
                    }],
                    volume_mounts: vec![
                        Self::mount("config", fluentbit::CONFIG_DIR, true),
                        Self::mount("output-tls", fluentbit::TLS_DIR, true),
                        Self::mount("varlog", "/var/log", true),
                        Self::mount("data", "/data", false),
                    ],
                };
                (container, vec![config, tls, varlog, data])
            }
            _ => {
                let file = if role == CollectorRole::MetricAgent {
                    otel::AGENT_FILE
                } else {
                    otel::GATEWAY_FILE
                };
                let mut ports = vec![ContainerPort {
                    name: "http-metrics".to_string(),
                    container_port: otel::METRICS_PORT,
                }];
                if !role.is_agent() {
                    ports.push(ContainerPort {
                        name: "grpc-otlp".to_string(),
                        container_port: otel::OTLP_GRPC_PORT,
                    });
                    ports.push(ContainerPort {
                        name: "http-otlp".to_string(),
                        container_port: otel::OTLP_HTTP_PORT,
                    });
                }
                let container = Container {
                    name: "collector".to_string(),
                    image: settings.otel_collector_image.clone(),
                    args: vec![format!("--config=/conf/{file}")],
                    env: vec![
                        Self::downward("MY_POD_IP", "status.podIP"),
                        Self::downward("MY_NODE_NAME", "spec.nodeName"),
                    ],
                    env_from,
                    ports,
                    volume_mounts: vec![Self::mount("config", "/conf", true)],
                };
                (container, vec![config])
            }
        };

        PodTemplateSpec {
            metadata: PodMeta {
                labels,
                annotations,
            },
            spec: PodSpec {
                containers: vec![container],
                volumes,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Enumeration of the credential-bearing fields of each pipeline kind

use crate::crd::{LogPipelineSpec, OtlpOutput, OutputTls, SignalSpec, ValueType};

/// One credential field of a pipeline spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialField {
    /// Stable identifier, e.g. `output.http.password`
    pub id: String,
    /// Literal or secret reference
    pub value: ValueType,
}

impl CredentialField {
    fn new(id: impl Into<String>, value: &ValueType) -> Self {
        Self {
            id: id.into(),
            value: value.clone(),
        }
    }
}

/// Field ids used by the synthesizers to look values up
pub mod ids {
    /// HTTP output host
    pub const HTTP_HOST: &str = "output.http.host";
    /// HTTP output user
    pub const HTTP_USER: &str = "output.http.user";
    /// HTTP output password
    pub const HTTP_PASSWORD: &str = "output.http.password";
    /// HTTP output TLS block
    pub const HTTP_TLS: &str = "output.http.tls";
    /// OTLP output endpoint
    pub const OTLP_ENDPOINT: &str = "output.otlp.endpoint";
    /// OTLP basic auth user
    pub const OTLP_BASIC_USER: &str = "output.otlp.authentication.basic.user";
    /// OTLP basic auth password
    pub const OTLP_BASIC_PASSWORD: &str = "output.otlp.authentication.basic.password";
    /// OTLP output TLS block
    pub const OTLP_TLS: &str = "output.otlp.tls";

    /// Id of the header with the given index
    pub fn otlp_header(index: usize) -> String {
        format!("output.otlp.headers[{index}]")
    }

    /// Id of a TLS member (`ca`, `cert`, `key`) below `tls_field`
    pub fn tls_member(tls_field: &str, member: &str) -> String {
        format!("{tls_field}.{member}")
    }

    /// Id of a LogPipeline variable
    pub fn variable(name: &str) -> String {
        format!("variables.{name}")
    }
}

fn push_optional(fields: &mut Vec<CredentialField>, id: &str, value: &Option<ValueType>) {
    if let Some(value) = value.as_ref().filter(|v| v.is_defined()) {
        fields.push(CredentialField::new(id, value));
    }
}

fn push_tls(fields: &mut Vec<CredentialField>, tls_field: &str, tls: &OutputTls) {
    push_optional(fields, &ids::tls_member(tls_field, "ca"), &tls.ca);
    push_optional(fields, &ids::tls_member(tls_field, "cert"), &tls.cert);
    push_optional(fields, &ids::tls_member(tls_field, "key"), &tls.key);
}

fn push_otlp(fields: &mut Vec<CredentialField>, otlp: &OtlpOutput) {
    fields.push(CredentialField::new(ids::OTLP_ENDPOINT, &otlp.endpoint));
    if let Some(basic) = otlp.authentication.as_ref().and_then(|a| a.basic.as_ref()) {
        fields.push(CredentialField::new(ids::OTLP_BASIC_USER, &basic.user));
        fields.push(CredentialField::new(ids::OTLP_BASIC_PASSWORD, &basic.password));
    }
    for (index, header) in otlp.headers.iter().enumerate() {
        fields.push(CredentialField::new(ids::otlp_header(index), &header.value));
    }
    if let Some(tls) = &otlp.tls {
        push_tls(fields, ids::OTLP_TLS, tls);
    }
}

fn log_fields(spec: &LogPipelineSpec, fields: &mut Vec<CredentialField>) {
    if let Some(http) = &spec.output.http {
        fields.push(CredentialField::new(ids::HTTP_HOST, &http.host));
        push_optional(fields, ids::HTTP_USER, &http.user);
        push_optional(fields, ids::HTTP_PASSWORD, &http.password);
        push_tls(fields, ids::HTTP_TLS, &http.tls);
    }
    if let Some(otlp) = &spec.output.otlp {
        push_otlp(fields, otlp);
    }
    for variable in &spec.variables {
        let value = ValueType {
            value: None,
            value_from: Some(variable.value_from.clone()),
        };
        fields.push(CredentialField::new(ids::variable(&variable.name), &value));
    }
}

/// All credential fields of a pipeline, in a stable order
pub fn credential_fields(spec: &SignalSpec) -> Vec<CredentialField> {
    let mut fields = Vec::new();
    match spec {
        SignalSpec::Logs(spec) => log_fields(spec, &mut fields),
        SignalSpec::Metrics(_) | SignalSpec::Traces(_) => {
            if let Some(otlp) = spec.otlp_output() {
                push_otlp(&mut fields, otlp);
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AuthenticationOptions, BasicAuth, Header, HttpOutput, LogPipelineOutput,
        LogPipelineVariable, TracePipelineOutput, TracePipelineSpec, ValueFromSource,
    };

    #[test]
    fn test_log_http_fields() {
        let spec = LogPipelineSpec {
            output: LogPipelineOutput {
                http: Some(HttpOutput {
                    host: ValueType::literal("logs.example.com"),
                    password: Some(ValueType::from_secret("ns", "creds", "password")),
                    tls: OutputTls {
                        ca: Some(ValueType::literal("ca-pem")),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
            variables: vec![LogPipelineVariable {
                name: "TOKEN".to_string(),
                value_from: ValueFromSource {
                    secret_key_ref: Some(crate::crd::SecretKeyRef::new("ns", "tok", "t")),
                },
            }],
            ..Default::default()
        };

        let found: Vec<String> = credential_fields(&SignalSpec::Logs(spec))
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(
            found,
            vec![
                "output.http.host",
                "output.http.password",
                "output.http.tls.ca",
                "variables.TOKEN"
            ]
        );
    }

    #[test]
    fn test_otlp_fields() {
        let spec = TracePipelineSpec {
            output: TracePipelineOutput {
                otlp: Some(OtlpOutput {
                    endpoint: ValueType::from_secret("ns", "backend", "endpoint"),
                    authentication: Some(AuthenticationOptions {
                        basic: Some(BasicAuth {
                            user: ValueType::literal("u"),
                            password: ValueType::from_secret("ns", "backend", "password"),
                        }),
                    }),
                    headers: vec![Header {
                        name: "X-Tenant".to_string(),
                        prefix: None,
                        value: ValueType::literal("team-a"),
                    }],
                    ..Default::default()
                }),
            },
        };

        let fields = credential_fields(&SignalSpec::Traces(spec));
        let found: Vec<&str> = fields.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(
            found,
            vec![
                ids::OTLP_ENDPOINT,
                ids::OTLP_BASIC_USER,
                ids::OTLP_BASIC_PASSWORD,
                "output.otlp.headers[0]"
            ]
        );
        assert!(fields[0].value.secret_key_ref().is_some());
    }
}

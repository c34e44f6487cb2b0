//! Checks shared by every output kind: value fields, TLS, OTLP

use std::net::IpAddr;

use super::{ValidationReport, Violation};
use crate::crd::{HttpOutput, OtlpOutput, OtlpProtocol, OutputTls, ValueType};

/// Check a value field. `required` fields must carry a literal or a reference.
pub(super) fn check_value(
    field: &str,
    value: &ValueType,
    required: bool,
    report: &mut ValidationReport,
) {
    let literal = value.literal_value().is_some();
    match value.secret_key_ref() {
        Some(reference) => {
            if literal {
                report.push(Violation::ValueAndSecretRef {
                    field: field.to_string(),
                });
            }
            if reference.name.is_empty() || reference.namespace.is_empty() || reference.key.is_empty() {
                report.push(Violation::IncompleteSecretRef {
                    field: field.to_string(),
                });
            }
        }
        None if required && !literal => report.push(Violation::MissingValue {
            field: field.to_string(),
        }),
        None => {}
    }
}

fn check_optional_value(field: &str, value: &Option<ValueType>, report: &mut ValidationReport) {
    if let Some(value) = value {
        check_value(field, value, false, report);
    }
}

/// TLS material is empty, CA only, or a full cert+key pair (optionally with CA)
pub(super) fn check_tls(field: &str, tls: &OutputTls, report: &mut ValidationReport) {
    check_optional_value(&format!("{field}.ca"), &tls.ca, report);
    check_optional_value(&format!("{field}.cert"), &tls.cert, report);
    check_optional_value(&format!("{field}.key"), &tls.key, report);
    if tls.has_cert() != tls.has_key() {
        report.push(Violation::IncompleteTlsConfig {
            field: field.to_string(),
        });
    }
}

pub(super) fn check_otlp_output(otlp: &OtlpOutput, report: &mut ValidationReport) {
    check_value("output.otlp.endpoint", &otlp.endpoint, true, report);
    if let Some(endpoint) = otlp.endpoint.literal_value() {
        if !is_valid_endpoint(endpoint) {
            report.push(Violation::InvalidEndpoint {
                endpoint: endpoint.to_string(),
            });
        }
    }

    if otlp.path.as_deref().is_some_and(|p| !p.is_empty()) && otlp.protocol != OtlpProtocol::Http {
        report.push(Violation::OtlpPathRequiresHttp);
    }

    if let Some(basic) = otlp.authentication.as_ref().and_then(|a| a.basic.as_ref()) {
        check_value("output.otlp.authentication.basic.user", &basic.user, true, report);
        check_value(
            "output.otlp.authentication.basic.password",
            &basic.password,
            true,
            report,
        );
    }

    for (index, header) in otlp.headers.iter().enumerate() {
        if header.name.trim().is_empty() {
            report.push(Violation::HeaderWithoutName { index });
        }
        check_value(
            &format!("output.otlp.headers[{index}]"),
            &header.value,
            true,
            report,
        );
    }

    if let Some(tls) = &otlp.tls {
        check_tls("output.otlp.tls", tls, report);
    }
}

pub(super) fn check_http_output(http: &HttpOutput, report: &mut ValidationReport) {
    check_value("output.http.host", &http.host, true, report);
    if let Some(host) = http.host.literal_value() {
        if !is_valid_hostname(host) {
            report.push(Violation::InvalidHostname {
                host: host.to_string(),
            });
        }
    }
    check_optional_value("output.http.user", &http.user, report);
    check_optional_value("output.http.password", &http.password, report);

    if let Some(uri) = http.uri.as_deref().filter(|u| !u.is_empty()) {
        if !uri.starts_with('/') {
            report.push(Violation::InvalidUri {
                uri: uri.to_string(),
            });
        }
    }

    check_tls("output.http.tls", &http.tls, report);
}

/// RFC 1123 hostname: dot-separated labels of alphanumerics and inner hyphens
pub(crate) fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// `[http|https://]host[:port][/path]` with a hostname or IP host
pub(crate) fn is_valid_endpoint(endpoint: &str) -> bool {
    if endpoint.chars().any(char::is_whitespace) {
        return false;
    }
    let rest = match endpoint.split_once("://") {
        Some(("http" | "https", rest)) => rest,
        Some(_) => return false,
        None => endpoint,
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        // [ipv6]:port
        match bracketed.split_once(']') {
            Some((ip, tail)) => (ip, tail.strip_prefix(':')),
            None => return false,
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return false;
        }
    }
    host.parse::<IpAddr>().is_ok() || is_valid_hostname(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthenticationOptions, BasicAuth, Header};

    fn reasons(report: &ValidationReport) -> Vec<&'static str> {
        report.reasons()
    }

    fn tls(ca: bool, cert: bool, key: bool) -> OutputTls {
        let pem = |on: bool| on.then(|| ValueType::literal("-----BEGIN-----"));
        OutputTls {
            ca: pem(ca),
            cert: pem(cert),
            key: pem(key),
            ..Default::default()
        }
    }

    /// Story: TLS material is accepted in exactly the three sane shapes
    ///
    /// Empty, CA only, and a full client pair (with or without a CA) pass;
    /// half a client pair never does.
    #[test]
    fn story_tls_tri_state() {
        let accepted = [
            tls(false, false, false),
            tls(true, false, false),
            tls(false, true, true),
            tls(true, true, true),
        ];
        for config in &accepted {
            let mut report = ValidationReport::default();
            check_tls("output.http.tls", config, &mut report);
            assert!(report.is_ok(), "{config:?} should pass");
        }

        let rejected = [
            tls(false, true, false),
            tls(false, false, true),
            tls(true, true, false),
            tls(true, false, true),
        ];
        for config in &rejected {
            let mut report = ValidationReport::default();
            check_tls("output.http.tls", config, &mut report);
            assert_eq!(reasons(&report), vec!["IncompleteTLSConfig"], "{config:?}");
        }
    }

    #[test]
    fn test_tls_key_from_secret_counts_as_set() {
        let config = OutputTls {
            cert: Some(ValueType::literal("cert")),
            key: Some(ValueType::from_secret("ns", "tls", "key")),
            ..Default::default()
        };
        let mut report = ValidationReport::default();
        check_tls("tls", &config, &mut report);
        assert!(report.is_ok());
    }

    #[test]
    fn test_secret_refs_must_be_complete() {
        let mut report = ValidationReport::default();
        check_value(
            "output.http.password",
            &ValueType::from_secret("", "creds", "password"),
            true,
            &mut report,
        );
        assert_eq!(reasons(&report), vec!["IncompleteSecretRef"]);

        let mut both = ValueType::from_secret("ns", "creds", "password");
        both.value = Some("inline".to_string());
        let mut report = ValidationReport::default();
        check_value("output.http.password", &both, true, &mut report);
        assert_eq!(reasons(&report), vec!["ValueAndSecretRef"]);

        let mut report = ValidationReport::default();
        check_value("output.http.host", &ValueType::default(), true, &mut report);
        assert_eq!(reasons(&report), vec!["MissingValue"]);
    }

    #[test]
    fn test_http_output_checks() {
        let http = HttpOutput {
            host: ValueType::literal("logs_backend!"),
            uri: Some("ingest".to_string()),
            ..Default::default()
        };
        let mut report = ValidationReport::default();
        check_http_output(&http, &mut report);
        assert_eq!(reasons(&report), vec!["InvalidHostname", "InvalidURI"]);

        let good = HttpOutput {
            host: ValueType::literal("logs.example.com"),
            uri: Some("/ingest".to_string()),
            ..Default::default()
        };
        let mut report = ValidationReport::default();
        check_http_output(&good, &mut report);
        assert!(report.is_ok());
    }

    #[test]
    fn test_otlp_output_checks() {
        let otlp = OtlpOutput {
            endpoint: ValueType::literal("ftp://backend"),
            path: Some("/v1/traces".to_string()),
            authentication: Some(AuthenticationOptions {
                basic: Some(BasicAuth {
                    user: ValueType::literal("user"),
                    password: ValueType::default(),
                }),
            }),
            headers: vec![Header {
                name: " ".to_string(),
                prefix: None,
                value: ValueType::literal("v"),
            }],
            ..Default::default()
        };
        let mut report = ValidationReport::default();
        check_otlp_output(&otlp, &mut report);
        assert_eq!(
            reasons(&report),
            vec![
                "InvalidEndpoint",
                "OTLPPathRequiresHTTP",
                "MissingValue",
                "HeaderWithoutName"
            ]
        );
    }

    #[test]
    fn test_endpoint_shapes() {
        for ok in [
            "http://backend:4317",
            "https://otlp.example.com/v1",
            "backend.observability:4317",
            "10.0.0.1:4318",
            "http://[::1]:4317",
        ] {
            assert!(is_valid_endpoint(ok), "{ok}");
        }
        for bad in ["", "grpc://backend", "http://backend:port", "has space:80", "http://[::1"] {
            assert!(!is_valid_endpoint(bad), "{bad}");
        }
    }
}

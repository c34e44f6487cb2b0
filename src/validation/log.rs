//! LogPipeline-specific checks: output exclusivity and raw Fluent Bit sections

use super::output::{check_http_output, check_otlp_output, check_value};
use super::{ValidationReport, Violation};
use crate::crd::{LogPipelineSpec, ValueType};
use crate::synthesis::fluentbit::CustomSection;

/// Keys the operator sets itself on every output
const FORBIDDEN_OUTPUT_KEYS: [&str; 2] = ["match", "storage.total_limit_size"];
/// Keys the operator sets itself on every filter
const FORBIDDEN_FILTER_KEYS: [&str; 1] = ["match"];

pub(super) fn check_log_pipeline(
    spec: &LogPipelineSpec,
    denied_filter_plugins: &[String],
    report: &mut ValidationReport,
) {
    check_output(spec, report);

    for filter in &spec.filters {
        if let Some(section) = check_custom_section("filter", &filter.custom, &FORBIDDEN_FILTER_KEYS, report) {
            if let Some(plugin) = section.name() {
                let plugin = plugin.to_lowercase();
                if denied_filter_plugins.contains(&plugin) {
                    report.push(Violation::DeniedFilterPlugin { plugin });
                }
            }
        }
    }

    let otlp_input = spec.input.otlp.as_ref().is_some_and(|i| !i.disabled);
    if otlp_input && spec.output.otlp.is_none() {
        report.push(Violation::OtlpInputRequiresOtlpOutput);
    }

    for variable in &spec.variables {
        match &variable.value_from.secret_key_ref {
            Some(_) => check_value(
                &format!("variables[{}]", variable.name),
                &ValueType {
                    value: None,
                    value_from: Some(variable.value_from.clone()),
                },
                true,
                report,
            ),
            None => report.push(Violation::VariableWithoutSecretRef {
                name: variable.name.clone(),
            }),
        }
    }
}

fn check_output(spec: &LogPipelineSpec, report: &mut ValidationReport) {
    let output = &spec.output;
    let custom = output.custom.as_deref().filter(|c| !c.trim().is_empty());

    let mut kinds = Vec::new();
    if custom.is_some() {
        kinds.push("custom");
    }
    if output.http.is_some() {
        kinds.push("http");
    }
    if output.otlp.is_some() {
        kinds.push("otlp");
    }
    match kinds.len() {
        0 => {
            report.push(Violation::NoOutputDefined);
            return;
        }
        1 => {}
        _ => {
            report.push(Violation::MultipleOutputsDefined { kinds });
            return;
        }
    }

    if let Some(http) = &output.http {
        check_http_output(http, report);
    }
    if let Some(otlp) = &output.otlp {
        check_otlp_output(otlp, report);
    }
    if let Some(custom) = custom {
        check_custom_section("output", custom, &FORBIDDEN_OUTPUT_KEYS, report);
    }
}

fn check_custom_section(
    kind: &'static str,
    text: &str,
    forbidden: &[&str],
    report: &mut ValidationReport,
) -> Option<CustomSection> {
    let section = match CustomSection::parse(text) {
        Ok(section) => section,
        Err(reason) => {
            report.push(Violation::MalformedCustomSection {
                section: kind,
                reason,
            });
            return None;
        }
    };
    if section.name().is_none() {
        report.push(Violation::CustomSectionMissingName { section: kind });
    }
    for key in forbidden {
        if section.contains(key) {
            report.push(Violation::ForbiddenCustomKey {
                section: kind,
                key: key.to_string(),
            });
        }
    }
    Some(section)
}

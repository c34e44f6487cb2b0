//! Minimal reader for the Prometheus text exposition format

use std::collections::BTreeMap;

use crate::Error;

/// One sample line
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Metric name
    pub name: String,
    /// Label pairs
    pub labels: BTreeMap<String, String>,
    /// Sample value
    pub value: f64,
}

impl Sample {
    /// Value of a label
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Parse exposition text. `# HELP`/`# TYPE` lines and timestamps are ignored.
pub fn parse(text: &str) -> crate::Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = parse_line(line)
            .ok_or_else(|| Error::serialization(format!("metrics line {}: cannot parse '{line}'", index + 1)))?;
        samples.push(sample);
    }
    Ok(samples)
}

fn parse_line(line: &str) -> Option<Sample> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }

    let mut rest = &line[name_end..];
    let mut labels = BTreeMap::new();
    if let Some(body) = rest.strip_prefix('{') {
        let (parsed, tail) = parse_labels(body)?;
        labels = parsed;
        rest = tail;
    }

    let value = rest.split_whitespace().next()?;
    let value = match value {
        "+Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        "NaN" => f64::NAN,
        v => v.parse().ok()?,
    };

    Some(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parse `a="x",b="y"}` and return the labels plus the text after `}`
fn parse_labels(body: &str) -> Option<(BTreeMap<String, String>, &str)> {
    let mut labels = BTreeMap::new();
    let mut chars = body.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace() || *c == ',').is_some() {}
        let (start, c) = chars.next()?;
        if c == '}' {
            return Some((labels, &body[start + 1..]));
        }

        let mut key = String::from(c);
        loop {
            let (_, c) = chars.next()?;
            if c == '=' {
                break;
            }
            key.push(c);
        }
        if chars.next()?.1 != '"' {
            return None;
        }

        let mut value = String::new();
        loop {
            let (_, c) = chars.next()?;
            match c {
                '"' => break,
                '\\' => match chars.next()?.1 {
                    'n' => value.push('\n'),
                    other => value.push(other),
                },
                other => value.push(other),
            }
        }
        labels.insert(key.trim().to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_otel_collector_output() {
        let text = r#"
# HELP otelcol_exporter_sent_spans Number of spans successfully sent to destination.
# TYPE otelcol_exporter_sent_spans counter
otelcol_exporter_sent_spans{exporter="otlp/jaeger",service_instance_id="a1"} 1234
otelcol_exporter_queue_size{data_type="traces",exporter="otlp/jaeger"} 12 1700000000000
otelcol_process_uptime 42.5
"#;
        let samples = parse(text).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].name, "otelcol_exporter_sent_spans");
        assert_eq!(samples[0].label("exporter"), Some("otlp/jaeger"));
        assert_eq!(samples[0].value, 1234.0);
        assert_eq!(samples[1].value, 12.0);
        assert!(samples[2].labels.is_empty());
    }

    #[test]
    fn test_escaped_label_values() {
        let samples = parse(r#"m{path="a\"b",msg="x\\y, z"} 1"#).unwrap();
        assert_eq!(samples[0].label("path"), Some("a\"b"));
        assert_eq!(samples[0].label("msg"), Some("x\\y, z"));
    }

    #[test]
    fn test_special_values_and_errors() {
        let samples = parse("a +Inf\nb NaN\n").unwrap();
        assert!(samples[0].value.is_infinite());
        assert!(samples[1].value.is_nan());

        assert!(parse("broken{label=\"x\" 1").is_err());
        assert!(parse("no_value").is_err());
    }
}

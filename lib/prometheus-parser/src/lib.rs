//! A small, focused parser for the Prometheus exposition formats.
//!
//! Unlike a full client-library parser, this crate does not reassemble
//! histogram buckets or summary quantiles into a single structured value —
//! callers here only ever deal in counters and gauges, so every labeled
//! sample is grouped under its literal metric name, which is all the
//! identity expander needs.

mod line;
pub mod proto;

use std::collections::BTreeMap;

use indexmap::IndexMap;
use snafu::ResultExt;

pub use line::{ErrorKind, MetricKind};
use line::{Help, Line};

pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Debug, snafu::Snafu, PartialEq)]
pub enum ParserError {
    #[snafu(display("{}, line: `{}`", kind, line))]
    WithLine {
        line: String,
        #[snafu(source)]
        kind: ErrorKind,
    },
}

/// A single sample for one metric family: its labels and value. The text
/// exposition format's own timestamp field is not exposed here — callers
/// stamp every sample with the scrape's own wall-clock time instead, since
/// most exporters never emit one.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// All samples sharing one literal metric name, plus whatever `# TYPE` and
/// `# HELP` metadata preceded them in the scrape body.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub help: Option<String>,
    pub samples: Vec<Sample>,
}

/// Parse a full Prometheus text-exposition response body into one
/// [`MetricFamily`] per distinct metric name, in first-seen order.
///
/// A family with no preceding `# TYPE` line defaults to
/// [`MetricKind::Untyped`], matching the exposition format's own fallback.
pub fn parse_text(input: &str) -> Result<Vec<MetricFamily>, ParserError> {
    let mut kinds: BTreeMap<String, MetricKind> = BTreeMap::new();
    let mut helps: BTreeMap<String, String> = BTreeMap::new();
    let mut families: IndexMap<String, MetricFamily> = IndexMap::new();

    for line in input.lines() {
        let parsed = Line::parse(line).with_context(|| WithLineSnafu {
            line: line.to_owned(),
        })?;

        match parsed {
            None => {}
            Some(Line::Type(header)) => {
                kinds.insert(header.metric_name, header.kind);
            }
            Some(Line::Help(Help { metric_name, text })) => {
                helps.insert(metric_name, text);
            }
            Some(Line::Metric(metric)) => {
                let kind = kinds
                    .get(&metric.name)
                    .copied()
                    .unwrap_or(MetricKind::Untyped);
                let help = helps.get(&metric.name).cloned();
                let family = families.entry(metric.name.clone()).or_insert_with(|| MetricFamily {
                    name: metric.name.clone(),
                    kind,
                    help,
                    samples: Vec::new(),
                });
                family.samples.push(Sample {
                    labels: metric.labels,
                    value: metric.value,
                });
            }
        }
    }

    Ok(families.into_values().collect())
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! labels {
        () => { BTreeMap::new() };
        ( $( $name:ident => $value:expr ),* ) => {{
            let mut result = BTreeMap::<String, String>::new();
            $( result.insert(stringify!($name).into(), $value.to_string()); )*
            result
        }};
    }

    #[test]
    fn test_parse_text_groups_by_literal_name() {
        let input = r##"
            # HELP http_requests_total The total number of HTTP requests.
            # TYPE http_requests_total counter
            http_requests_total{method="post",code="200"} 1027 1395066363000
            http_requests_total{method="post",code="400"}    3 1395066363000

            # Escaping in label values:
            msdos_file_access_time_seconds{path="C:\\DIR\\FILE.TXT",error="Cannot find file:\n\"FILE.TXT\""} 1.458255915e9

            # Minimalistic line:
            metric_without_timestamp_and_labels 12.47

            # A weird metric from before the epoch:
            something_weird{problem="division by zero"} +Inf -3982045
            "##;
        let output = parse_text(input).unwrap();
        assert_eq!(output.len(), 4);

        assert_eq!(output[0].name, "http_requests_total");
        assert_eq!(output[0].kind, MetricKind::Counter);
        assert_eq!(
            output[0].help.as_deref(),
            Some("The total number of HTTP requests.")
        );
        assert_eq!(output[0].samples.len(), 2);
        assert_eq!(
            output[0].samples[0],
            Sample {
                labels: labels!(method => "post", code => 200),
                value: 1027.0,
            }
        );

        assert_eq!(output[1].name, "msdos_file_access_time_seconds");
        assert_eq!(output[1].kind, MetricKind::Untyped);
        assert_eq!(output[1].help, None);

        assert_eq!(output[2].name, "metric_without_timestamp_and_labels");
        assert_eq!(output[2].samples[0].value, 12.47);

        assert_eq!(output[3].name, "something_weird");
        assert!(output[3].samples[0].value.is_infinite());
    }

    #[test]
    fn test_untyped_default_when_no_type_header() {
        let input = "bare_metric 5";
        let output = parse_text(input).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].kind, MetricKind::Untyped);
        assert_eq!(output[0].help, None);
    }

    #[test]
    fn test_repeated_family_after_other_lines() {
        // Real exporters sometimes interleave comments between samples of the
        // same family; they must still land in one family.
        let input = r##"
            # TYPE requests counter
            requests{path="/a"} 1
            # a stray comment
            requests{path="/b"} 2
            "##;
        let output = parse_text(input).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].samples.len(), 2);
    }

    #[test]
    fn test_errors() {
        let input = r##"name{registry="default" content_type="html"} 1890"##;
        let error = parse_text(input).unwrap_err();
        assert!(matches!(
            error,
            ParserError::WithLine {
                kind: ErrorKind::ExpectedChar { expected: ',', .. },
                ..
            }
        ));

        let input = r##"# TYPE a counte"##;
        let error = parse_text(input).unwrap_err();
        assert!(matches!(
            error,
            ParserError::WithLine {
                kind: ErrorKind::InvalidMetricKind { .. },
                ..
            }
        ));

        let input = r##"name abcd"##;
        let error = parse_text(input).unwrap_err();
        assert!(matches!(
            error,
            ParserError::WithLine {
                kind: ErrorKind::ParseFloatError { .. },
                ..
            }
        ));
    }
}

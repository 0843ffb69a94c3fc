//! Decoding of the Prometheus binary delimited exposition format
//! (`application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily;
//! encoding=delimited`).
//!
//! Each message on the wire is prefixed with a protobuf varint giving its
//! encoded length, repeated until the buffer is exhausted.

#![allow(clippy::doc_markdown)]

include!(concat!(env!("OUT_DIR"), "/io.prometheus.client.rs"));

use bytes::Buf;
use prost::Message;
use snafu::{ResultExt, Snafu};

use crate::{MetricFamily as FlatMetricFamily, MetricKind, Sample};

#[derive(Debug, Snafu)]
pub enum ProtoDecodeError {
    #[snafu(display("failed to decode delimited protobuf message: {}", source))]
    Decode { source: prost::DecodeError },
}

impl MetricType {
    fn to_metric_kind(self) -> MetricKind {
        match self {
            MetricType::Counter => MetricKind::Counter,
            MetricType::Gauge => MetricKind::Gauge,
            MetricType::Summary => MetricKind::Summary,
            MetricType::Untyped => MetricKind::Untyped,
            MetricType::Histogram => MetricKind::Histogram,
        }
    }
}

/// Decode a full buffer of length-delimited `MetricFamily` messages into our
/// flat [`FlatMetricFamily`] representation, one entry per message (a given
/// family name may repeat if the exporter emitted it more than once; callers
/// that need a single record per name should merge by `name` themselves, the
/// same as for the text format).
pub fn decode_delimited(mut buf: &[u8]) -> Result<Vec<FlatMetricFamily>, ProtoDecodeError> {
    let mut families = Vec::new();

    while buf.has_remaining() {
        let family = MetricFamily::decode_length_delimited(&mut buf).context(DecodeSnafu)?;
        families.push(flatten(family));
    }

    Ok(families)
}

fn flatten(family: MetricFamily) -> FlatMetricFamily {
    let kind = family
        .r#type
        .and_then(MetricType::from_i32)
        .map_or(MetricKind::Untyped, MetricType::to_metric_kind);

    let samples = family
        .metric
        .into_iter()
        .flat_map(|metric| sample_values(kind, metric))
        .collect();

    FlatMetricFamily {
        name: family.name.unwrap_or_default(),
        kind,
        help: family.help,
        samples,
    }
}

/// Only counters and gauges carry a scalar value the collector can use — a
/// `MonitoredMetric`'s declared type is always one of those two (see the
/// data model), so histogram and summary families decode to zero samples
/// rather than the multi-series bucket/quantile expansion a full Prometheus
/// client would perform.
fn sample_values(kind: MetricKind, metric: Metric) -> Vec<Sample> {
    let labels: std::collections::BTreeMap<String, String> = metric
        .label
        .iter()
        .filter_map(|pair| Some((pair.name.clone()?, pair.value.clone().unwrap_or_default())))
        .collect();

    let value = match kind {
        MetricKind::Counter => metric.counter.and_then(|c| c.value),
        MetricKind::Gauge => metric.gauge.and_then(|g| g.value),
        MetricKind::Untyped => metric.untyped.and_then(|u| u.value),
        MetricKind::Histogram | MetricKind::Summary => None,
    };

    value.map(|value| Sample { labels, value }).into_iter().collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_empty_buffer() {
        let families = decode_delimited(&[]).unwrap();
        assert!(families.is_empty());
    }

    #[test]
    fn test_decode_single_counter_family() {
        let family = MetricFamily {
            name: Some("requests_total".to_owned()),
            help: Some("total requests".to_owned()),
            r#type: Some(MetricType::Counter as i32),
            metric: vec![Metric {
                label: vec![LabelPair {
                    name: Some("method".to_owned()),
                    value: Some("GET".to_owned()),
                }],
                counter: Some(Counter { value: Some(42.0) }),
                gauge: None,
                summary: None,
                untyped: None,
                histogram: None,
                timestamp_ms: None,
            }],
        };

        let mut buf = Vec::new();
        family.encode_length_delimited(&mut buf).unwrap();

        let decoded = decode_delimited(&buf).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "requests_total");
        assert_eq!(decoded[0].kind, MetricKind::Counter);
        assert_eq!(decoded[0].samples.len(), 1);
        assert_eq!(decoded[0].samples[0].value, 42.0);
    }
}

//! Azure Monitor metrics of a resource
//!
//! Every resource gets a "Metrics" node. Opening it lists the resource's
//! metric definitions; opening a definition plots the last four hours of
//! its primary aggregation as a text graph.

use super::default::arm_failure;
use super::expander::Expander;
use super::types::{
    ExpanderResponse, ExpanderResult, MetricContext, TreeNode, METRICS_TYPE, METRIC_TYPE, RESOURCE_TYPE,
};
use crate::armclient::ArmClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

const SOURCE: &str = "MetricsExpander";
const METRICS_API_VERSION: &str = "2018-01-01";
const LOOKBACK_HOURS: i64 = 4;
const GRAPH_HEIGHT: usize = 10;
const GRAPH_WIDTH: usize = 80;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Localized {
    #[serde(default)]
    value: String,
    #[serde(default)]
    localized_value: String,
}

#[derive(Debug, Deserialize)]
struct DefinitionList {
    #[serde(default)]
    value: Vec<MetricDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricDefinition {
    name: Localized,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    primary_aggregation_type: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(default)]
    value: Vec<Metric>,
}

#[derive(Debug, Deserialize)]
struct Metric {
    #[serde(default)]
    timeseries: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(default)]
    data: Vec<Value>,
}

pub struct MetricsExpander {
    client: ArmClient,
}

impl MetricsExpander {
    pub fn new(client: ArmClient) -> Self {
        Self { client }
    }

    async fn expand_definitions(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(&node.expand_url).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };
        let resource_id = node
            .context
            .metric
            .as_ref()
            .map(|m| m.resource_id.as_str())
            .unwrap_or(node.parent_id.as_str());
        match definition_nodes(node, resource_id, &body, Utc::now()) {
            Ok(nodes) => ExpanderResult::primary(SOURCE, ExpanderResponse::json(body), nodes),
            Err(e) => ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::text(body)),
        }
    }

    async fn expand_graph(&self, node: &TreeNode) -> ExpanderResult {
        let body = match self.client.get(&node.expand_url).await {
            Ok(body) => body,
            Err(e) => return arm_failure(SOURCE, e),
        };
        let metric = node.context.metric.clone().unwrap_or_default();
        match data_points(&body, &metric.aggregation) {
            Ok(points) => {
                let caption = format!(
                    "{} (Aggregate: '{}' Unit: '{}')",
                    node.name, metric.aggregation, metric.unit
                );
                let graph = render_graph(&points);
                ExpanderResult::primary(
                    SOURCE,
                    ExpanderResponse::text(format!("{}\n\n{}\n time: {}hrs ago ----> now", caption, graph, LOOKBACK_HOURS)),
                    Vec::new(),
                )
            }
            Err(e) => ExpanderResult::failed(SOURCE, e).with_response(ExpanderResponse::json(body)),
        }
    }
}

/// The "Metrics" grouping node of a resource
fn metrics_node(resource: &TreeNode) -> TreeNode {
    let definitions = format!("{}/providers/microsoft.Insights/metricdefinitions", resource.id);
    let mut node = TreeNode::child_of(resource, definitions.clone(), "Metrics", METRICS_TYPE)
        .with_namespace("None")
        .with_display("[Microsoft.Insights] Metrics")
        .with_expand_url(format!("{}?api-version={}", definitions, METRICS_API_VERSION));
    node.suppress_swagger_expand = true;
    node.suppress_generic_expand = true;
    node.context.metric = Some(MetricContext {
        resource_id: resource.id.clone(),
        ..Default::default()
    });
    node
}

/// Metric values of `definition` on `resource_id` over the hours before `now`
fn metric_url(resource_id: &str, definition: &MetricDefinition, now: DateTime<Utc>) -> String {
    let from = (now - Duration::hours(LOOKBACK_HOURS)).to_rfc3339_opts(SecondsFormat::Millis, true);
    let to = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut url = format!(
        "{}/providers/microsoft.Insights/metrics?timespan={}&interval=PT1M&metricnames={}&aggregation={}",
        resource_id,
        urlencoding::encode(&format!("{}/{}", from, to)),
        urlencoding::encode(&definition.name.value),
        urlencoding::encode(&definition.primary_aggregation_type),
    );
    if let Some(namespace) = definition.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        url.push_str(&format!("&metricNamespace={}", urlencoding::encode(namespace)));
    }
    url.push_str(&format!("&autoadjusttimegrain=true&api-version={}", METRICS_API_VERSION));
    url
}

fn definition_nodes(parent: &TreeNode, resource_id: &str, body: &str, now: DateTime<Utc>) -> Result<Vec<TreeNode>> {
    let list: DefinitionList = serde_json::from_str(body).context("Error unmarshalling metric definitions")?;

    Ok(list
        .value
        .into_iter()
        .map(|definition| {
            let display = if definition.name.localized_value.is_empty() {
                definition.name.value.clone()
            } else {
                definition.name.localized_value.clone()
            };
            let id = format!("{}/providers/microsoft.Insights/metrics/{}", resource_id, definition.name.value);
            let mut node = TreeNode::child_of(parent, id, definition.name.value.clone(), METRIC_TYPE)
                .with_display(format!("{} ({})", display, definition.unit))
                .with_expand_url(metric_url(resource_id, &definition, now));
            node.suppress_swagger_expand = true;
            node.suppress_generic_expand = true;
            node.context.metric = Some(MetricContext {
                resource_id: resource_id.to_string(),
                aggregation: definition.primary_aggregation_type.to_lowercase(),
                unit: definition.unit.to_lowercase(),
            });
            node
        })
        .collect())
}

/// Values of the first time series; points without the aggregation count as 0
fn data_points(body: &str, aggregation: &str) -> Result<Vec<f64>> {
    let response: MetricResponse = serde_json::from_str(body).context("Error unmarshalling metric values")?;
    let series = response
        .value
        .into_iter()
        .next()
        .and_then(|metric| metric.timeseries.into_iter().next())
        .context("Metric returned no time series")?;

    Ok(series
        .data
        .iter()
        .map(|point| point.get(aggregation).and_then(Value::as_f64).unwrap_or(0.0))
        .collect())
}

/// Averages `points` into at most `width` columns
fn downsample(points: &[f64], width: usize) -> Vec<f64> {
    if points.len() <= width {
        return points.to_vec();
    }
    let chunk = points.len().div_ceil(width);
    points
        .chunks(chunk)
        .map(|c| c.iter().sum::<f64>() / c.len() as f64)
        .collect()
}

/// Bar chart of `points`, highest row first, labelled with the max and min
fn render_graph(points: &[f64]) -> String {
    let columns = downsample(points, GRAPH_WIDTH);
    let max = columns.iter().copied().fold(0.0_f64, f64::max);
    let min = columns.iter().copied().fold(0.0_f64, f64::min);
    let range = (max - min).max(f64::EPSILON);

    let mut lines = Vec::with_capacity(GRAPH_HEIGHT + 1);
    for row in (0..GRAPH_HEIGHT).rev() {
        let threshold = min + range * (row as f64 + 0.5) / GRAPH_HEIGHT as f64;
        let label = match row {
            r if r == GRAPH_HEIGHT - 1 => format!("{:.2}", max),
            0 => format!("{:.2}", min),
            _ => String::new(),
        };
        let bars: String = columns.iter().map(|v| if *v >= threshold { '█' } else { ' ' }).collect();
        lines.push(format!("{:>12} ┤{}", label, bars.trim_end()));
    }
    lines.push(format!("{:>12} └{}", "", "─".repeat(columns.len())));
    lines.join("\n")
}

#[async_trait]
impl Expander for MetricsExpander {
    fn name(&self) -> &'static str {
        SOURCE
    }

    fn does_expand(&self, node: &TreeNode) -> Result<bool> {
        Ok(matches!(node.item_type.as_str(), RESOURCE_TYPE | METRICS_TYPE | METRIC_TYPE))
    }

    async fn expand(&self, node: &TreeNode) -> ExpanderResult {
        match node.item_type.as_str() {
            METRICS_TYPE => self.expand_definitions(node).await,
            METRIC_TYPE => self.expand_graph(node).await,
            _ => ExpanderResult::nodes(SOURCE, vec![metrics_node(node)]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SITE: &str = "/subscriptions/1/resourceGroups/rg/providers/Microsoft.Web/sites/app";

    fn definition(name: &str, aggregation: &str) -> MetricDefinition {
        MetricDefinition {
            name: Localized {
                value: name.to_string(),
                localized_value: String::new(),
            },
            unit: "Count".to_string(),
            primary_aggregation_type: aggregation.to_string(),
            namespace: Some("Microsoft.Web/sites".to_string()),
        }
    }

    #[test]
    fn test_metrics_node() {
        let mut site = TreeNode::new(SITE, "app", RESOURCE_TYPE);
        site.subscription_id = "1".to_string();
        let node = metrics_node(&site);
        assert_eq!(node.id, format!("{}/providers/microsoft.Insights/metricdefinitions", SITE));
        assert_eq!(node.expand_url, format!("{}?api-version=2018-01-01", node.id));
        assert_eq!(node.parent_id, SITE);
        assert_eq!(node.subscription_id, "1");
        assert!(node.suppress_generic_expand && node.suppress_swagger_expand);
        assert_eq!(node.context.metric.as_ref().unwrap().resource_id, SITE);
    }

    #[test]
    fn test_metric_url() {
        let now = Utc.with_ymd_and_hms(2020, 3, 31, 12, 0, 0).unwrap();
        let url = metric_url(SITE, &definition("Http 5xx", "Total"), now);
        assert!(url.starts_with(&format!("{}/providers/microsoft.Insights/metrics?timespan=", SITE)));
        assert!(url.contains("2020-03-31T08%3A00%3A00.000Z%2F2020-03-31T12%3A00%3A00.000Z"));
        assert!(url.contains("&metricnames=Http%205xx&aggregation=Total"));
        assert!(url.contains("&metricNamespace=Microsoft.Web%2Fsites"));
        assert!(url.ends_with("&api-version=2018-01-01"));
    }

    #[test]
    fn test_definition_nodes() {
        let body = r#"{"value":[
            {"name":{"value":"CpuTime","localizedValue":"CPU Time"},"unit":"Seconds","primaryAggregationType":"Total"},
            {"name":{"value":"Requests"},"unit":"Count","primaryAggregationType":"Average"}
        ]}"#;
        let parent = metrics_node(&TreeNode::new(SITE, "app", RESOURCE_TYPE));
        let nodes = definition_nodes(&parent, SITE, body, Utc::now()).unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].display, "CPU Time (Seconds)");
        assert_eq!(nodes[1].display, "Requests (Count)");
        assert_eq!(nodes[0].item_type, METRIC_TYPE);
        assert_eq!(nodes[0].id, format!("{}/providers/microsoft.Insights/metrics/CpuTime", SITE));
        let metric = nodes[0].context.metric.as_ref().unwrap();
        assert_eq!(metric.aggregation, "total");
        assert_eq!(metric.unit, "seconds");
        assert!(!nodes[0].expand_url.contains("metricNamespace"));
    }

    #[test]
    fn test_data_points() {
        let body = r#"{"value":[{"timeseries":[{"data":[
            {"timeStamp":"2020-03-31T08:00:00Z","total":2.5},
            {"timeStamp":"2020-03-31T08:01:00Z"},
            {"timeStamp":"2020-03-31T08:02:00Z","total":4}
        ]}]}]}"#;
        assert_eq!(data_points(body, "total").unwrap(), vec![2.5, 0.0, 4.0]);
        assert!(data_points(r#"{"value":[]}"#, "total").is_err());
        assert!(data_points(r#"{"value":[{"timeseries":[]}]}"#, "total").is_err());
    }

    #[test]
    fn test_downsample_averages_chunks() {
        let points: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(downsample(&points, 5), vec![0.5, 2.5, 4.5, 6.5, 8.5]);
        assert_eq!(downsample(&points, 20), points);
    }

    #[test]
    fn test_render_graph() {
        let graph = render_graph(&[0.0, 5.0, 10.0]);
        let lines: Vec<&str> = graph.lines().collect();
        assert_eq!(lines.len(), GRAPH_HEIGHT + 1);
        assert!(lines[0].trim_start().starts_with("10.00 ┤"));
        assert!(lines[0].ends_with("┤  █"));
        assert!(lines[GRAPH_HEIGHT - 1].ends_with("┤ ██"));
        assert!(lines[GRAPH_HEIGHT].ends_with("└───"));

        // A flat zero series draws no bars
        assert!(render_graph(&[0.0, 0.0]).lines().take(GRAPH_HEIGHT).all(|l| l.ends_with('┤')));
    }
}

//! Samples routed through the `metrics` facade into a Prometheus recorder.

use std::sync::Arc;
use std::time::Duration;

use mcpload_client::{AmbientTags, CallContext, MetricsFacadeSink, MetricsRecorder};
use metrics_exporter_prometheus::PrometheusBuilder;

#[test]
fn test_samples_render_as_prometheus_series() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let tags = AmbientTags::new();
        tags.set("scenario", "smoke");
        let metrics = MetricsRecorder::new(Arc::new(MetricsFacadeSink::new())).with_tags(tags);
        let ctx = CallContext::new();

        metrics.record(&ctx, "tools/call", Duration::from_millis(12), false);
        metrics.record(&ctx, "tools/call", Duration::from_millis(40), true);
        metrics.record(&ctx, "ping", Duration::from_millis(1), false);
    });

    let rendered = handle.render();
    assert!(
        rendered.contains(r#"mcp_request_count{method="tools/call",scenario="smoke"} 2"#),
        "{rendered}"
    );
    assert!(
        rendered.contains(r#"mcp_request_errors{method="tools/call",scenario="smoke"} 1"#),
        "{rendered}"
    );
    assert!(
        rendered.contains(r#"mcp_request_count{method="ping",scenario="smoke"} 1"#),
        "{rendered}"
    );
    assert!(!rendered.contains(r#"mcp_request_errors{method="ping""#), "{rendered}");
    assert!(rendered.contains("mcp_request_duration"), "{rendered}");
}

#[test]
fn test_done_context_records_nothing() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    metrics::with_local_recorder(&recorder, || {
        let metrics = MetricsRecorder::new(Arc::new(MetricsFacadeSink::new()));
        let ctx = CallContext::new();
        ctx.cancel();
        metrics.record(&ctx, "tools/list", Duration::from_millis(5), true);
    });

    assert!(!handle.render().contains("tools/list"));
}

//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 不启动 HTTP 端点，由调用方在需要时渲染指标快照。

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Metrics 资源句柄
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// 安装 Prometheus recorder
pub fn init() -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Prometheus recorder 安装失败")?;

    describe_metrics();

    Ok(MetricsHandle { handle })
}

fn describe_metrics() {
    metrics::describe_counter!("rule_builds_total", "Total number of knowledge base builds");
    metrics::describe_histogram!(
        "rule_build_duration_seconds",
        "Knowledge base build duration in seconds"
    );
    metrics::describe_gauge!("knowledge_rules", "Number of rules in the published knowledge base");
}

/// 记录一次知识库构建
#[inline]
pub fn record_rule_build(mode: &'static str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!(
        "rule_builds_total",
        "mode" => mode,
        "status" => status
    )
    .increment(1);

    metrics::histogram!("rule_build_duration_seconds", "mode" => mode).record(duration_secs);
}

/// 更新已发布知识库的规则数量
#[inline]
pub fn set_knowledge_rules(count: usize) {
    metrics::gauge!("knowledge_rules").set(count as f64);
}

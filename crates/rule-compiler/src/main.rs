//! 规则编译器入口
//!
//! 按配置加载规则脚本：先全量构建，再依次应用增量脚本，最后输出知识库的执行顺序。

use anyhow::{Context, Result};
use rule_compiler::{DataContext, RuleBuilder};
use rulebase_shared::config::AppConfig;
use rulebase_shared::observability;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "rule-compiler";

fn main() -> Result<()> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        }
    });

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let guard = observability::init(&obs_config)?;

    info!(environment = %config.environment, "Starting rule compiler...");

    let builder = RuleBuilder::new(Arc::new(DataContext::new()));

    let source = read_scripts(&config.rules.scripts)?;
    let summary = builder
        .build(&source)
        .inspect_err(|e| error!(error = %e, "Full build failed"))
        .context("full build failed")?;
    info!(
        version = summary.version,
        rules = summary.rule_count,
        scripts = config.rules.scripts.len(),
        "Knowledge base built"
    );

    for path in &config.rules.incremental_scripts {
        let source = read_script(path)?;
        let summary = builder
            .build_incremental(&source)
            .inspect_err(|e| {
                error!(path = %path.display(), error = %e, "Incremental update failed")
            })
            .with_context(|| format!("incremental update from {} failed", path.display()))?;
        info!(
            path = %path.display(),
            version = summary.version,
            added = summary.added,
            replaced = summary.replaced,
            reordered = summary.reordered,
            "Incremental update applied"
        );
    }

    let knowledge = builder.knowledge();
    println!("{}", serde_json::to_string_pretty(&knowledge.summary())?);

    if let Some(rendered) = guard.render_metrics() {
        debug!(metrics = %rendered, "Metrics snapshot");
    }

    info!("Rule compiler finished");
    Ok(())
}

/// 读取并拼接全量构建脚本
fn read_scripts(paths: &[PathBuf]) -> Result<String> {
    let mut source = String::new();
    for path in paths {
        source.push_str(&read_script(path)?);
        source.push('\n');
    }
    Ok(source)
}

fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read rule script {}", path.display()))
}

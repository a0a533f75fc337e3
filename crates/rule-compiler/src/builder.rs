//! 规则构建器
//!
//! 构建器持有唯一一份已发布的知识库，负责全量重建、增量合并和规则删除。
//! 所有写操作在同一把互斥锁内串行执行：先在锁内构建完整的新知识库，
//! 再通过一次 `ArcSwap::store` 原子发布。读者无需加锁，持有旧快照的读者不受影响。

use crate::entity::RuleEntity;
use crate::environment::DataContext;
use crate::error::{BuildError, Result};
use crate::frontend::{FrontEnd, ScriptParser};
use crate::knowledge::{KnowledgeContext, MergeOutcome, WorkingCopy};
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rulebase_shared::observability::metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// 构建方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Full,
    Incremental,
    Remove,
}

impl BuildMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次成功构建的统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub mode: BuildMode,
    /// 发布后的知识库版本
    pub version: u64,
    pub rule_count: usize,
    pub added: usize,
    pub replaced: usize,
    pub reordered: usize,
    pub removed: usize,
}

impl BuildSummary {
    fn new(mode: BuildMode, version: u64) -> Self {
        Self {
            mode,
            version,
            rule_count: 0,
            added: 0,
            replaced: 0,
            reordered: 0,
            removed: 0,
        }
    }
}

/// 已发布知识库的只读句柄
///
/// 可以克隆后交给执行引擎，`load` 只是一次原子读取。
#[derive(Clone)]
pub struct KnowledgeHandle {
    current: Arc<ArcSwap<KnowledgeContext>>,
}

impl KnowledgeHandle {
    fn new(context: KnowledgeContext) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(context)),
        }
    }

    /// 获取当前知识库快照
    pub fn load(&self) -> Arc<KnowledgeContext> {
        self.current.load_full()
    }

    fn publish(&self, context: KnowledgeContext) {
        self.current.store(Arc::new(context));
    }
}

/// 构建器内部状态，由构建锁保护
#[derive(Debug, Default)]
struct BuildState {
    /// 最近一次发布的版本
    version: u64,
}

/// 规则构建器
pub struct RuleBuilder<F = ScriptParser> {
    front_end: F,
    environment: Arc<DataContext>,
    published: KnowledgeHandle,
    state: Mutex<BuildState>,
}

impl RuleBuilder<ScriptParser> {
    /// 使用默认脚本解析器创建构建器
    pub fn new(environment: Arc<DataContext>) -> Self {
        Self::with_front_end(environment, ScriptParser::new())
    }
}

impl<F: FrontEnd> RuleBuilder<F> {
    pub fn with_front_end(environment: Arc<DataContext>, front_end: F) -> Self {
        Self {
            front_end,
            environment,
            published: KnowledgeHandle::new(KnowledgeContext::empty()),
            state: Mutex::new(BuildState::default()),
        }
    }

    pub fn environment(&self) -> &Arc<DataContext> {
        &self.environment
    }

    /// 当前发布的知识库
    pub fn knowledge(&self) -> Arc<KnowledgeContext> {
        self.published.load()
    }

    /// 供执行引擎持有的只读句柄
    pub fn handle(&self) -> KnowledgeHandle {
        self.published.clone()
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<RuleEntity>> {
        self.published.load().get(name).cloned()
    }

    /// 逐个检查规则是否存在
    pub fn is_exist<I, S>(&self, names: I) -> Vec<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let knowledge = self.published.load();
        names
            .into_iter()
            .map(|n| knowledge.contains(n.as_ref()))
            .collect()
    }

    /// 全量重建
    ///
    /// 解析失败时已发布的知识库保持不变；成功时整体替换，旧规则全部丢弃。
    #[instrument(skip(self, source), fields(source_len = source.len()))]
    pub fn build(&self, source: &str) -> Result<BuildSummary> {
        let mut state = self.state.lock();
        let start = Instant::now();

        let result = self.rebuild(&mut state, source);
        record_build(BuildMode::Full, &result, start.elapsed());
        result
    }

    /// 增量更新
    ///
    /// 同名规则被替换，新规则按优先级插入，未出现在脚本中的已有规则原样保留。
    #[instrument(skip(self, source), fields(source_len = source.len()))]
    pub fn build_incremental(&self, source: &str) -> Result<BuildSummary> {
        let mut state = self.state.lock();
        let start = Instant::now();

        let result = self.merge(&mut state, source);
        record_build(BuildMode::Incremental, &result, start.elapsed());
        result
    }

    /// 删除规则
    ///
    /// 任一名称不存在时整体失败，不做任何修改。
    #[instrument(skip(self, names))]
    pub fn remove_rules<I, S>(&self, names: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<S> = names.into_iter().collect();
        let mut state = self.state.lock();
        let start = Instant::now();

        let result = self.remove(&mut state, &names);
        record_build(BuildMode::Remove, &result, start.elapsed());
        result
    }

    fn parse(&self, source: &str) -> Result<IndexMap<String, RuleEntity>> {
        let outcome = self.front_end.parse(source);
        if outcome.has_errors() {
            warn!(
                grammar_errors = outcome.grammar_errors.len(),
                semantic_errors = outcome.semantic_errors.len(),
                "规则解析失败，已发布的知识库保持不变"
            );
            return Err(BuildError::Parse {
                grammar: outcome.grammar_errors,
                semantic: outcome.semantic_errors,
            });
        }
        Ok(outcome.rules)
    }

    fn rebuild(&self, state: &mut BuildState, source: &str) -> Result<BuildSummary> {
        let rules = self.parse(source)?;
        let previous = self.published.load();

        let entities = rules.into_values().map(|mut rule| {
            rule.initialize(&self.environment);
            Arc::new(rule)
        });

        let version = state.version + 1;
        let context = KnowledgeContext::from_entities(entities, version);

        let mut summary = BuildSummary::new(BuildMode::Full, version);
        summary.rule_count = context.len();
        summary.added = context.len();
        summary.removed = previous.len();

        self.published.publish(context);
        state.version = version;

        info!(
            version,
            rules = summary.rule_count,
            replaced_rules = summary.removed,
            "知识库全量构建完成"
        );
        Ok(summary)
    }

    fn merge(&self, state: &mut BuildState, source: &str) -> Result<BuildSummary> {
        let rules = self.parse(source)?;
        if rules.is_empty() {
            warn!("增量更新没有解析出任何规则");
            return Err(BuildError::EmptyUpdate);
        }

        let current = self.published.load();
        let mut working = WorkingCopy::from_published(&current);
        let version = state.version + 1;
        let mut summary = BuildSummary::new(BuildMode::Incremental, version);

        for (name, mut rule) in rules {
            rule.initialize(&self.environment);
            match working.upsert(Arc::new(rule)) {
                MergeOutcome::Added { at } => {
                    debug!(rule = %name, position = at, "新增规则");
                    summary.added += 1;
                }
                MergeOutcome::Replaced { at } => {
                    debug!(rule = %name, position = at, "原位替换规则");
                    summary.replaced += 1;
                }
                MergeOutcome::Reordered { from, to } => {
                    debug!(rule = %name, from, to, "规则优先级变化，重新排序");
                    summary.reordered += 1;
                }
            }
        }

        let context = working.into_context(version);
        summary.rule_count = context.len();

        self.published.publish(context);
        state.version = version;

        info!(
            version,
            rules = summary.rule_count,
            added = summary.added,
            replaced = summary.replaced,
            reordered = summary.reordered,
            "知识库增量更新完成"
        );
        Ok(summary)
    }

    fn remove<S: AsRef<str>>(&self, state: &mut BuildState, names: &[S]) -> Result<BuildSummary> {
        let current = self.published.load();
        let targets: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();

        let mut missing: Vec<String> = targets
            .iter()
            .filter(|n| !current.contains(n))
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            missing.sort();
            warn!(missing = ?missing, "删除不存在的规则");
            return Err(BuildError::RuleNotFound(missing));
        }

        if targets.is_empty() {
            let mut summary = BuildSummary::new(BuildMode::Remove, state.version);
            summary.rule_count = current.len();
            return Ok(summary);
        }

        let mut working = WorkingCopy::from_published(&current);
        let removed = working.remove_all(&targets);

        let version = state.version + 1;
        let context = working.into_context(version);
        let mut summary = BuildSummary::new(BuildMode::Remove, version);
        summary.rule_count = context.len();
        summary.removed = removed;

        self.published.publish(context);
        state.version = version;

        info!(version, rules = summary.rule_count, removed, "规则已删除");
        Ok(summary)
    }
}

fn record_build(mode: BuildMode, result: &Result<BuildSummary>, elapsed: Duration) {
    metrics::record_rule_build(mode.as_str(), result.is_ok(), elapsed.as_secs_f64());
    if let Ok(summary) = result {
        metrics::set_knowledge_rules(summary.rule_count);
    }
}

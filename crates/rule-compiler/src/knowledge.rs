//! 知识库上下文
//!
//! `KnowledgeContext` 由三部分组成，任何对读者可见的时刻它们都保持一致：
//! - `registry`: 规则名称 -> 规则实体
//! - `ordering`: 按优先级降序排列的规则序列，即执行顺序
//! - `index`: 规则名称 -> 在 `ordering` 中的位置
//!
//! 已发布的上下文是只读的。增量合并在 `WorkingCopy` 上完成，完成后整体转换为新上下文再发布。

use crate::entity::RuleEntity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// 编译后的知识库
#[derive(Debug, Clone)]
pub struct KnowledgeContext {
    registry: HashMap<String, Arc<RuleEntity>>,
    ordering: Vec<Arc<RuleEntity>>,
    index: HashMap<String, usize>,
    version: u64,
    built_at: DateTime<Utc>,
}

impl KnowledgeContext {
    /// 空知识库（版本 0）
    pub fn empty() -> Self {
        Self {
            registry: HashMap::new(),
            ordering: Vec::new(),
            index: HashMap::new(),
            version: 0,
            built_at: Utc::now(),
        }
    }

    /// 全量构建
    ///
    /// 按优先级降序稳定排序，优先级相同的规则保持输入顺序。
    pub(crate) fn from_entities<I>(entities: I, version: u64) -> Self
    where
        I: IntoIterator<Item = Arc<RuleEntity>>,
    {
        let mut ordering: Vec<Arc<RuleEntity>> = entities.into_iter().collect();
        ordering.sort_by(|a, b| b.salience().cmp(&a.salience()));

        let index = build_index(&ordering);
        let registry = ordering
            .iter()
            .map(|r| (r.name().to_string(), Arc::clone(r)))
            .collect();

        Self {
            registry,
            ordering,
            index,
            version,
            built_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.ordering.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordering.is_empty()
    }

    /// 执行顺序
    pub fn ordering(&self) -> &[Arc<RuleEntity>] {
        &self.ordering
    }

    /// 执行顺序中的规则名称
    pub fn ordered_names(&self) -> Vec<&str> {
        self.ordering.iter().map(|r| r.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RuleEntity>> {
        self.registry.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// 规则在执行顺序中的位置
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn index(&self) -> &HashMap<String, usize> {
        &self.index
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// 校验三部分结构是否一致，返回第一处不一致的描述
    pub fn check_invariants(&self) -> Result<(), String> {
        check_structures(&self.registry, &self.ordering, &self.index)
    }

    pub fn summary(&self) -> KnowledgeSummary {
        KnowledgeSummary {
            version: self.version,
            built_at: self.built_at,
            rules: self
                .ordering
                .iter()
                .enumerate()
                .map(|(position, r)| RuleSummary {
                    position,
                    name: r.name().to_string(),
                    salience: r.salience(),
                    description: r.description().to_string(),
                })
                .collect(),
        }
    }
}

impl Default for KnowledgeContext {
    fn default() -> Self {
        Self::empty()
    }
}

/// 可序列化的知识库摘要
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeSummary {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    pub rules: Vec<RuleSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub position: usize,
    pub name: String,
    pub salience: i64,
    pub description: String,
}

/// 单条规则合并到工作副本的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// 新规则，插入到 `at`
    Added { at: usize },
    /// 同名同优先级，原位替换
    Replaced { at: usize },
    /// 同名但优先级变化，从 `from` 移到 `to`
    Reordered { from: usize, to: usize },
}

/// 有序插入位置
///
/// 在按优先级降序排列的序列中二分查找 `salience` 的插入位置。
/// 相同优先级的规则已存在时，新规则排在它们之后。
pub fn insertion_point(ordering: &[Arc<RuleEntity>], salience: i64) -> usize {
    ordering.partition_point(|r| r.salience() >= salience)
}

/// 增量合并使用的工作副本（写时复制）
#[derive(Debug)]
pub(crate) struct WorkingCopy {
    registry: HashMap<String, Arc<RuleEntity>>,
    ordering: Vec<Arc<RuleEntity>>,
    index: HashMap<String, usize>,
}

impl WorkingCopy {
    pub(crate) fn from_published(published: &KnowledgeContext) -> Self {
        Self {
            registry: published.registry.clone(),
            ordering: published.ordering.clone(),
            index: published.index.clone(),
        }
    }

    /// 合并一条规则：新增、原位替换或重新排序
    pub(crate) fn upsert(&mut self, entity: Arc<RuleEntity>) -> MergeOutcome {
        let outcome = match self.index.get(entity.name()).copied() {
            Some(pos) if self.ordering[pos].salience() == entity.salience() => {
                // 排序键未变，位置与索引都不受影响
                self.ordering[pos] = Arc::clone(&entity);
                MergeOutcome::Replaced { at: pos }
            }
            Some(pos) => {
                self.ordering.remove(pos);
                let at = insertion_point(&self.ordering, entity.salience());
                self.ordering.insert(at, Arc::clone(&entity));
                self.renumber(pos.min(at), pos.max(at));
                MergeOutcome::Reordered { from: pos, to: at }
            }
            None => {
                let at = insertion_point(&self.ordering, entity.salience());
                self.ordering.insert(at, Arc::clone(&entity));
                self.renumber(at, self.ordering.len() - 1);
                MergeOutcome::Added { at }
            }
        };

        self.registry.insert(entity.name().to_string(), entity);
        outcome
    }

    /// 删除一组规则，返回实际删除的数量
    pub(crate) fn remove_all(&mut self, names: &HashSet<&str>) -> usize {
        let before = self.ordering.len();
        self.ordering.retain(|r| !names.contains(r.name()));
        for name in names {
            self.registry.remove(*name);
        }
        self.index = build_index(&self.ordering);
        before - self.ordering.len()
    }

    /// 重新编号 `[from, to]` 区间内规则的位置
    fn renumber(&mut self, from: usize, to: usize) {
        for (pos, rule) in self.ordering.iter().enumerate().take(to + 1).skip(from) {
            self.index.insert(rule.name().to_string(), pos);
        }
    }

    pub(crate) fn into_context(self, version: u64) -> KnowledgeContext {
        debug_assert!(
            check_structures(&self.registry, &self.ordering, &self.index).is_ok(),
            "工作副本结构不一致"
        );
        KnowledgeContext {
            registry: self.registry,
            ordering: self.ordering,
            index: self.index,
            version,
            built_at: Utc::now(),
        }
    }
}

fn build_index(ordering: &[Arc<RuleEntity>]) -> HashMap<String, usize> {
    ordering
        .iter()
        .enumerate()
        .map(|(pos, r)| (r.name().to_string(), pos))
        .collect()
}

fn check_structures(
    registry: &HashMap<String, Arc<RuleEntity>>,
    ordering: &[Arc<RuleEntity>],
    index: &HashMap<String, usize>,
) -> Result<(), String> {
    if registry.len() != ordering.len() || index.len() != ordering.len() {
        return Err(format!(
            "规模不一致: registry={}, ordering={}, index={}",
            registry.len(),
            ordering.len(),
            index.len()
        ));
    }

    for (pos, pair) in ordering.windows(2).enumerate() {
        if pair[0].salience() < pair[1].salience() {
            return Err(format!(
                "位置 {} 的规则 {}({}) 排在 {}({}) 之前，违反降序",
                pos,
                pair[0].name(),
                pair[0].salience(),
                pair[1].name(),
                pair[1].salience()
            ));
        }
    }

    for (pos, rule) in ordering.iter().enumerate() {
        match index.get(rule.name()) {
            Some(&p) if p == pos => {}
            other => {
                return Err(format!(
                    "规则 {} 位于 {}，索引记录为 {:?}",
                    rule.name(),
                    pos,
                    other
                ));
            }
        }
        match registry.get(rule.name()) {
            Some(r) if Arc::ptr_eq(r, rule) => {}
            _ => {
                return Err(format!(
                    "规则 {} 在注册表中的实体与执行序列不一致",
                    rule.name()
                ));
            }
        }
    }

    Ok(())
}

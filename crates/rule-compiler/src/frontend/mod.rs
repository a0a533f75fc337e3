//! 规则脚本前端
//!
//! 前端把脚本文本解析为规则实体，同时收集语法错误和语义错误。
//! 构建器只依赖 `FrontEnd` 契约，任何一类错误非空都会让本次构建失败。

mod parser;

pub use parser::ScriptParser;

use crate::entity::RuleEntity;
use indexmap::IndexMap;
use std::fmt;

/// 前端契约
#[cfg_attr(test, mockall::automock)]
pub trait FrontEnd: Send + Sync {
    /// 解析脚本，返回按出现顺序排列的规则及全部错误
    fn parse(&self, source: &str) -> ParseOutcome;
}

/// 解析结果
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// 规则名称 -> 规则实体，保持脚本中的出现顺序
    pub rules: IndexMap<String, RuleEntity>,
    pub grammar_errors: Vec<GrammarError>,
    pub semantic_errors: Vec<SemanticError>,
}

impl ParseOutcome {
    pub fn has_errors(&self) -> bool {
        !self.grammar_errors.is_empty() || !self.semantic_errors.is_empty()
    }

    pub fn from_rules<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = RuleEntity>,
    {
        Self {
            rules: rules
                .into_iter()
                .map(|r| (r.name().to_string(), r))
                .collect(),
            ..Default::default()
        }
    }
}

/// 语法错误（词法或句法）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl GrammarError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.line, self.column, self.message)
    }
}

/// 语义错误（规则结构合法性）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    /// 出错的规则名称，名称本身无效时为空
    pub rule: Option<String>,
    pub line: usize,
    pub message: String,
}

impl SemanticError {
    pub fn new(rule: Option<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            rule,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Some(rule) => write!(f, "{} 规则 \"{}\": {}", self.line, rule, self.message),
            None => write!(f, "{} {}", self.line, self.message),
        }
    }
}

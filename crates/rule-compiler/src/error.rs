//! 规则构建错误类型

use crate::frontend::{GrammarError, SemanticError};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// 前端解析失败，汇总全部语法错误与语义错误
    #[error("规则解析失败: {}", describe_parse_errors(.grammar, .semantic))]
    Parse {
        grammar: Vec<GrammarError>,
        semantic: Vec<SemanticError>,
    },

    #[error("增量更新为空: 没有需要新增或更新的规则")]
    EmptyUpdate,

    #[error("规则未找到: {}", .0.join(", "))]
    RuleNotFound(Vec<String>),
}

impl BuildError {
    /// 语法错误数量
    pub fn grammar_error_count(&self) -> usize {
        match self {
            Self::Parse { grammar, .. } => grammar.len(),
            _ => 0,
        }
    }

    /// 语义错误数量
    pub fn semantic_error_count(&self) -> usize {
        match self {
            Self::Parse { semantic, .. } => semantic.len(),
            _ => 0,
        }
    }
}

/// 合并后的错误描述：先列出语法错误，再列出语义错误
fn describe_parse_errors(grammar: &[GrammarError], semantic: &[SemanticError]) -> String {
    let mut out = format!("{} 个语法错误, {} 个语义错误", grammar.len(), semantic.len());
    for e in grammar {
        // String 的 fmt::Write 不会失败
        let _ = write!(out, "; [语法] {}", e);
    }
    for e in semantic {
        let _ = write!(out, "; [语义] {}", e);
    }
    out
}

pub type Result<T> = std::result::Result<T, BuildError>;

//! 规则编译器
//!
//! 将规则脚本编译为按优先级排序、可按名称查询的知识库，支持：
//! - 全量重建与增量合并
//! - 写时复制 + 原子发布，读者无锁访问
//! - 语法/语义错误汇总报告

pub mod builder;
pub mod entity;
pub mod environment;
pub mod error;
pub mod frontend;
pub mod knowledge;

pub use builder::{BuildMode, BuildSummary, KnowledgeHandle, RuleBuilder};
pub use entity::{RuleBody, RuleEntity};
pub use environment::DataContext;
pub use error::{BuildError, Result};
pub use frontend::{FrontEnd, GrammarError, ParseOutcome, ScriptParser, SemanticError};
pub use knowledge::{KnowledgeContext, KnowledgeSummary, MergeOutcome, RuleSummary, insertion_point};

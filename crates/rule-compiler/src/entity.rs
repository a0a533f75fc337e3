//! 规则实体
//!
//! 一条规则编译后的内存表示。实体由前端创建，发布前通过 `initialize`
//! 绑定运行时环境，此后不再修改；规则变更总是用新实体整体替换旧实体。

use crate::environment::DataContext;
use std::sync::Arc;

/// 规则体（不透明的可执行内容）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBody {
    /// 规则体原文
    pub source: String,
    /// 规则体在脚本中的起始行（从 1 开始）
    pub line: usize,
}

impl RuleBody {
    pub fn new(source: impl Into<String>, line: usize) -> Self {
        Self {
            source: source.into(),
            line,
        }
    }
}

/// 规则实体
#[derive(Debug, Clone)]
pub struct RuleEntity {
    name: String,
    description: String,
    salience: i64,
    body: RuleBody,
    environment: Option<Arc<DataContext>>,
}

impl RuleEntity {
    pub fn new(name: impl Into<String>, salience: i64, body: RuleBody) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            salience,
            body,
            environment: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 规则名称（唯一标识）
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// 优先级，数值越大越先执行
    pub fn salience(&self) -> i64 {
        self.salience
    }

    pub fn body(&self) -> &RuleBody {
        &self.body
    }

    /// 绑定运行时环境
    ///
    /// 每个实体只绑定一次，重复调用不会替换已绑定的环境并返回 `false`。
    pub fn initialize(&mut self, environment: &Arc<DataContext>) -> bool {
        if self.environment.is_some() {
            return false;
        }
        self.environment = Some(Arc::clone(environment));
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.environment.is_some()
    }

    pub fn environment(&self) -> Option<&Arc<DataContext>> {
        self.environment.as_ref()
    }
}

//! 规则运行时环境
//!
//! `DataContext` 是交给规则初始化的不透明绑定表，构建器只负责转交，从不读取其内容。

use dashmap::DashMap;
use serde_json::Value;

/// 运行时数据上下文
#[derive(Debug, Default)]
pub struct DataContext {
    bindings: DashMap<String, Value>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册绑定，返回被覆盖的旧值
    pub fn add(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.bindings.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.bindings.get(key).map(|v| v.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.bindings.remove(key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

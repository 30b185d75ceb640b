use serde::{Deserialize, Serialize};
use std::fmt;

const DISPATCHING_FAILURE_GROUP: &str = "DispatchingFailureGroup";

/// 监听组
///
/// 同名的组在任意多个节点上声明时共享同一个持久工作队列并竞争消费。
/// `Group::dispatching_failure()` 为哨兵组，仅用于存放在到达任何组队列之前
/// 就发布失败的事件，不能作为监听组注册。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(String);

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn dispatching_failure() -> Self {
        Self(DISPATCHING_FAILURE_GROUP.to_string())
    }

    pub fn is_dispatching_failure(&self) -> bool {
        self.0 == DISPATCHING_FAILURE_GROUP
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//! 按会话分片的内存表
//!
//! 外层 RwLock 只在查找 / 创建分片时短暂持有；每个会话一把独立的 Mutex，
//! 不同会话之间互不阻塞，同一会话内的写入串行。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

pub struct Shards<T> {
    inner: RwLock<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> Shards<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// 获取会话分片，不存在时创建
    pub async fn get_or_create(&self, conversation_id: &str) -> Arc<Mutex<T>> {
        if let Some(shard) = self.inner.read().await.get(conversation_id) {
            return Arc::clone(shard);
        }
        let mut map = self.inner.write().await;
        Arc::clone(map.entry(conversation_id.to_string()).or_default())
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Arc<Mutex<T>>> {
        self.inner.read().await.get(conversation_id).cloned()
    }
}

impl<T: Default> Default for Shards<T> {
    fn default() -> Self {
        Self::new()
    }
}

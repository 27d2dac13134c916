// 写入器注册表
//
// 以 "存储桶/对象名" 为键记录活跃写入器的状态句柄，仅供诊断页面读取，
// 上传逻辑本身不依赖它。登记与注销由调用方显式完成。

use crate::uploader::status::{WriterSnapshot, WriterStatus};
use crate::uploader::writer::Writer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 活跃写入器注册表
#[derive(Debug, Default)]
pub struct WriterRegistry {
    /// 首次登记时才创建
    writers: Mutex<Option<HashMap<String, Arc<WriterStatus>>>>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记写入器；同一键已存在时覆盖
    pub fn add(&self, writer: &Writer) {
        let status = writer.status();
        let key = status.key();
        let mut writers = self.writers.lock();
        writers.get_or_insert_with(HashMap::new).insert(key.clone(), status);
        debug!("登记写入器: {}", key);
    }

    /// 注销写入器；不存在时不做任何事
    pub fn remove(&self, writer: &Writer) {
        let key = writer.key();
        let mut writers = self.writers.lock();
        if let Some(map) = writers.as_mut() {
            if map.remove(&key).is_some() {
                debug!("注销写入器: {}", key);
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.writers
            .lock()
            .as_ref()
            .map_or(false, |map| map.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.writers.lock().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有活跃写入器的快照，按键排序
    pub fn snapshot(&self) -> Vec<WriterSnapshot> {
        let statuses: Vec<Arc<WriterStatus>> = match self.writers.lock().as_ref() {
            Some(map) => map.values().cloned().collect(),
            None => return Vec::new(),
        };
        let mut snapshots: Vec<WriterSnapshot> = statuses.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b2::{Client, FileInfoMap, MemoryB2};
    use std::thread;
    use tokio_util::sync::CancellationToken;

    async fn bucket() -> crate::b2::Bucket {
        let api = Arc::new(MemoryB2::new().with_bucket("media"));
        let client = Client::authorize(&CancellationToken::new(), api, "acct", "key")
            .await
            .unwrap();
        client.bucket(&CancellationToken::new(), "media").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let bucket = bucket().await;
        let registry = WriterRegistry::new();
        assert!(registry.is_empty());

        let writer = bucket.new_writer(CancellationToken::new(), "a.bin", "x", FileInfoMap::new());
        registry.add(&writer);
        registry.add(&writer);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("media/a.bin"));

        registry.remove(&writer);
        registry.remove(&writer);
        assert!(registry.is_empty());
        assert!(!registry.contains("media/a.bin"));
    }

    #[tokio::test]
    async fn test_remove_before_any_add() {
        let bucket = bucket().await;
        let registry = WriterRegistry::new();
        let writer = bucket.new_writer(CancellationToken::new(), "a.bin", "x", FileInfoMap::new());
        registry.remove(&writer);
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_same_key_is_replaced() {
        let bucket = bucket().await;
        let registry = WriterRegistry::new();
        let first = bucket.new_writer(CancellationToken::new(), "dup.bin", "x", FileInfoMap::new());
        let second = bucket.new_writer(CancellationToken::new(), "dup.bin", "x", FileInfoMap::new());

        registry.add(&first);
        registry.add(&second);
        assert_eq!(registry.len(), 1);

        // 任一写入器注销都会移除该键
        registry.remove(&first);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_add_remove() {
        let bucket = bucket().await;
        let registry = Arc::new(WriterRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                let bucket = bucket.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let writer = bucket.new_writer(
                            CancellationToken::new(),
                            format!("t{}/{}", t, i),
                            "x",
                            FileInfoMap::new(),
                        );
                        registry.add(&writer);
                        if i % 2 == 0 {
                            registry.remove(&writer);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 25);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 8 * 25);
        assert!(snapshot.windows(2).all(|w| w[0].key < w[1].key));
    }
}

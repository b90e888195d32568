use async_trait::async_trait;
use candela_core::cache::error::CacheError;
use candela_core::cache::port::{BlobStore, SortedSetStore};
use dashmap::DashMap;
use std::collections::BTreeSet;

/// # Summary
/// 基于 DashMap 的内存 Blob 存储实现。
///
/// # Invariants
/// - 所有操作均通过并发哈希表 `DashMap` 执行，保证多线程安全。
/// - 数据随进程退出而丢失，仅用于测试或无需跨重启的部署。
pub struct MemBlobStore {
    // 线程安全的 KV 存储容器
    storage: DashMap<String, Vec<u8>>,
}

impl MemBlobStore {
    /// # Summary
    /// 创建一个新的 MemBlobStore 实例。
    ///
    /// # Returns
    /// * `Self` - 初始化的存储实例。
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }
}

impl Default for MemBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    /// # Summary
    /// 保存原始字节数据。
    ///
    /// # Logic
    /// 将 Key 转换为 String 后与 Value 一并插入哈希表。若存在同名 Key 则覆盖。
    async fn save_blob(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.storage.insert(key.to_string(), value);
        Ok(())
    }

    /// # Summary
    /// 读取原始字节数据。
    ///
    /// # Logic
    /// 从哈希表中检索 Key 对应的引用，并将其克隆为独立的所有权对象返回。
    async fn load_blob(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    /// # Summary
    /// 删除指定键。
    ///
    /// # Logic
    /// 从哈希表中执行原子移除操作，无论键是否存在均返回 Ok。
    async fn delete_blob(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key);
        Ok(())
    }
}

/// # Summary
/// 内存版有序集合，语义对齐 Redis ZSET，用于测试与单机部署。
///
/// # Invariants
/// - 每个键对应一个按 (score, member) 排序的集合。
/// - 同一 member 只出现一次，重复添加会更新其分值。
pub struct MemSortedSetStore {
    sets: DashMap<String, BTreeSet<(i64, Vec<u8>)>>,
}

impl MemSortedSetStore {
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }
}

impl Default for MemSortedSetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SortedSetStore for MemSortedSetStore {
    async fn add_or_update(
        &self,
        key: &str,
        member: Vec<u8>,
        score: i64,
    ) -> Result<(), CacheError> {
        let mut set = self.sets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| *m != member);
        set.insert((score, member));
        Ok(())
    }

    async fn range_by_score(
        &self,
        key: &str,
        lo: i64,
        hi: i64,
    ) -> Result<Vec<Vec<u8>>, CacheError> {
        if lo > hi {
            return Ok(Vec::new());
        }
        Ok(self
            .sets
            .get(key)
            .map(|set| {
                set.range((lo, Vec::new())..)
                    .take_while(|(score, _)| *score <= hi)
                    .map(|(_, member)| member.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_range_by_rank(
        &self,
        key: &str,
        lo_rank: usize,
        hi_rank: usize,
    ) -> Result<(), CacheError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            let doomed: Vec<(i64, Vec<u8>)> = set
                .iter()
                .enumerate()
                .filter(|(rank, _)| *rank >= lo_rank && *rank <= hi_rank)
                .map(|(_, entry)| entry.clone())
                .collect();
            for entry in doomed {
                set.remove(&entry);
            }
        }
        Ok(())
    }

    async fn remove_range_by_score(&self, key: &str, lo: i64, hi: i64) -> Result<(), CacheError> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.retain(|(score, _)| *score < lo || *score > hi);
        }
        Ok(())
    }

    async fn cardinality(&self, key: &str) -> Result<usize, CacheError> {
        Ok(self.sets.get(key).map(|set| set.len()).unwrap_or(0))
    }
}

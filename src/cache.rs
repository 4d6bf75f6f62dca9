use std::num::NonZeroUsize;
use std::time::SystemTime;

use bytes::Bytes;
use lru::LruCache;

/// 超过该大小的文件不进入缓存
pub const MAX_CACHED_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// 静态资源的 LRU 缓存，文件修改时间变化后对应条目失效
pub struct FileCache {
    cache: LruCache<String, CacheEntry>,
}

impl FileCache {
    // 容量为 0 属于调用方错误，配置层已经把 0 改写为默认值
    pub fn from_capacity(capacity: usize) -> Self {
        let Some(capacity) = NonZeroUsize::new(capacity) else {
            panic!("调用from_capacity时指定的大小是0。如果需要自动设置大小，请在调用处进行处理，而不是传入0");
        };
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn push(&mut self, filename: &str, bytes: Bytes, modified_time: SystemTime) {
        let entry = CacheEntry {
            content: bytes,
            modified_time,
        };
        self.cache.put(filename.to_string(), entry);
    }

    pub fn should_cache(file_size: u64) -> bool {
        file_size <= MAX_CACHED_FILE_SIZE
    }

    /// 只返回修改时间一致的条目
    pub fn find(&mut self, filename: &str, current_modified_time: SystemTime) -> Option<Bytes> {
        match self.cache.get(filename) {
            Some(entry) if entry.modified_time == current_modified_time => {
                Some(entry.content.clone())
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

//! 按文件名加锁：同名上传串行执行，不同文件名互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

#[derive(Debug)]
pub struct LockTimeout;

/// Async mutexes keyed by stored file name.
#[derive(Debug)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    wait: Duration,
}

/// 持有期间独占该文件名；释放时顺带回收无人使用的锁条目。
pub struct NameGuard<'a> {
    manager: &'a LockManager,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockManager {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            wait,
        }
    }

    /// 在配置的等待时间内获取文件名锁，超时返回 `LockTimeout`。
    pub async fn lock_name(&self, name: &str) -> Result<NameGuard<'_>, LockTimeout> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = time::timeout(self.wait, lock.lock_owned())
            .await
            .map_err(|_| LockTimeout)?;
        Ok(NameGuard {
            manager: self,
            name: name.to_string(),
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

impl NameGuard<'_> {
    pub async fn release(mut self) {
        drop(self.guard.take());
        let mut locks = self.manager.locks.lock().await;
        // Only the map itself still references an idle lock.
        let idle = locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.name);
        }
    }
}

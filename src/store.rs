//! State の永続化先（任意）
//!
//! ワークフローの正しい実行に永続化は不要です。プロセスをまたいで
//! [`State`](crate::state::State) を保存・復元したい場合にのみ、
//! [`Store`] を実装したバックエンドを外部から注入します。
//!
//! 値はバイト列として扱います。State は各値を JSON にシリアライズして保存します。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::ExecutionError;

/// キー・バリュー型の永続化インターフェース
#[async_trait]
pub trait Store: Send + Sync {
    /// 値を取得（存在しなければ `None`）
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExecutionError>;

    /// 値を保存（既存の値は上書き）
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ExecutionError>;

    /// 値を削除（存在しなくてもエラーにしない）
    async fn delete(&self, key: &str) -> Result<(), ExecutionError>;

    /// 保存されている全キー
    async fn keys(&self) -> Result<Vec<String>, ExecutionError>;

    /// バックエンドから読み込む
    async fn load(&self) -> Result<(), ExecutionError>;

    /// バックエンドへ書き出す
    async fn save(&self) -> Result<(), ExecutionError>;
}

/// プロセス内メモリのみを使う [`Store`]
///
/// `load` / `save` は何もしません。テストや単一プロセスでの再開に使います。
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// 空のストアを生成
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ExecutionError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), ExecutionError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ExecutionError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, ExecutionError> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn load(&self) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn save(&self) -> Result<(), ExecutionError> {
        Ok(())
    }
}

//! ワークフロー実行中の状態（State）
//!
//! # 責務
//!
//! - ステップ間で受け渡すデータをキー・バリュー形式で保持
//! - 型付きアクセサによるベストエフォートな値の取り出し
//! - 複製（[`State::clone`]）と統合（[`State::merge`]）
//!
//! # 型変換のルール
//!
//! 型付きアクセサは失敗しません。キーが存在しない、または型が一致しない場合は
//! ゼロ値（`""`, `0`, `0.0`, `false`, 空のコレクション）を返します。
//! 整数アクセサは浮動小数点数を切り捨てて変換します。数値文字列はパースしません。
//!
//! # 並行性
//!
//! State はロックを持ちません。1回の実行につき1つの State を所有し、
//! `&mut State` を通じて逐次的に更新します。
//! [`Parallel`](crate::engine::Parallel) の各ブランチは独立した複製を受け取り、
//! 元の State への書き戻しはアグリゲーターだけが行います。
//!
//! # 使用例
//!
//! ```rust
//! use melted_flow::state::State;
//! use serde_json::json;
//!
//! let mut state = State::new();
//! state.set("count", json!(3.9));
//! state.set("name", "report");
//!
//! assert_eq!(state.get_int("count"), 3);
//! assert_eq!(state.get_string("name"), "report");
//! assert_eq!(state.get_string("missing"), "");
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::ExecutionError;
use crate::store::Store;

/// キー・バリュー形式の実行状態
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: HashMap<String, Value>,
}

impl State {
    /// 空の State を生成
    pub fn new() -> Self {
        Self::default()
    }

    /// 値を取得
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// 値を設定（既存の値は上書き）
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// キーが存在するか
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 値を削除し、削除した値を返す
    pub fn delete(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// 全キー（ソート済み）
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 保持している値の数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 空かどうか
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// キーと値のイテレーター（順序は不定）
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// 文字列として取得
    pub fn get_string(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// 整数として取得（浮動小数点数は切り捨て）
    pub fn get_int(&self, key: &str) -> i64 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|v| v.min(i64::MAX as u64) as i64))
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// 浮動小数点数として取得
    pub fn get_float(&self, key: &str) -> f64 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// 真偽値として取得
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Value::Bool(true)))
    }

    /// 文字列の配列として取得
    ///
    /// 配列内の文字列以外の要素は読み飛ばします。
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// オブジェクトとして取得
    pub fn get_object(&self, key: &str) -> Map<String, Value> {
        match self.values.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    /// 別の State を統合
    ///
    /// キーが衝突した場合は `other` の値で上書きします（後勝ち）。
    pub fn merge(&mut self, other: &State) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// 全ての値をストアへ保存
    ///
    /// 各値は JSON にシリアライズしてキーごとに書き込み、最後に
    /// [`Store::save`] を呼び出します。
    pub async fn save_to(&self, store: &dyn Store) -> Result<(), ExecutionError> {
        for (key, value) in &self.values {
            let bytes = serde_json::to_vec(value)?;
            store.set(key, bytes).await?;
        }
        store.save().await
    }

    /// ストアから State を復元
    pub async fn load_from(store: &dyn Store) -> Result<Self, ExecutionError> {
        store.load().await?;

        let mut state = State::new();
        for key in store.keys().await? {
            if let Some(bytes) = store.get(&key).await? {
                let value: Value = serde_json::from_slice(&bytes)?;
                state.values.insert(key, value);
            }
        }
        Ok(state)
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_basic_map_operations() {
        let mut state = State::new();
        assert!(state.is_empty());

        state.set("a", 1);
        state.set("b", "two");
        assert!(state.has("a"));
        assert_eq!(state.len(), 2);
        assert_eq!(state.keys(), vec!["a", "b"]);

        assert_eq!(state.delete("a"), Some(json!(1)));
        assert!(!state.has("a"));
        assert_eq!(state.delete("a"), None);
    }

    #[test]
    fn test_typed_accessors_coerce_or_zero() {
        let mut state = State::new();
        state.set("float", json!(2.75));
        state.set("negative", json!(-2.75));
        state.set("int", json!(42));
        state.set("text", "42");
        state.set("flag", true);
        state.set("list", json!(["a", 1, "b"]));
        state.set("obj", json!({"k": "v"}));

        assert_eq!(state.get_int("float"), 2);
        assert_eq!(state.get_int("negative"), -2);
        assert_eq!(state.get_int("int"), 42);
        assert_eq!(state.get_int("text"), 0);
        assert_eq!(state.get_int("missing"), 0);

        assert_eq!(state.get_float("int"), 42.0);
        assert_eq!(state.get_float("text"), 0.0);

        assert_eq!(state.get_string("text"), "42");
        assert_eq!(state.get_string("int"), "");

        assert!(state.get_bool("flag"));
        assert!(!state.get_bool("int"));

        assert_eq!(state.get_string_list("list"), vec!["a", "b"]);
        assert!(state.get_string_list("text").is_empty());

        assert_eq!(state.get_object("obj").get("k"), Some(&json!("v")));
        assert!(state.get_object("list").is_empty());
    }

    #[test]
    fn test_clone_is_independent() {
        let mut state = State::new();
        state.set("k", "original");

        let mut copy = state.clone();
        copy.set("k", "changed");
        copy.set("extra", 1);

        assert_eq!(state.get_string("k"), "original");
        assert!(!state.has("extra"));
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut base = State::new();
        base.set("shared", "base");
        base.set("only_base", 1);

        let mut other = State::new();
        other.set("shared", "other");
        other.set("only_other", 2);

        base.merge(&other);
        assert_eq!(base.get_string("shared"), "other");
        assert_eq!(base.get_int("only_base"), 1);
        assert_eq!(base.get_int("only_other"), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_through_store() {
        let store = MemoryStore::new();
        let mut state = State::new();
        state.set("topic", "rust");
        state.set("scores", json!([1, 2, 3]));

        state.save_to(&store).await.unwrap();
        let restored = State::load_from(&store).await.unwrap();

        assert_eq!(restored, state);
    }
}

//! リトライ設定とバックオフ計算
//!
//! 試行 `n`（0始まり）の待機時間は次の式で求めます。
//!
//! ```text
//! base(n)  = min(max_delay, initial_delay × multiplier^n)
//! delay(n) = base(n) × (1 + jitter × u),  u ~ Uniform[-1, 1]
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// リトライ設定
///
/// 1回の呼び出しの間は変更されません。一度構築して多数の実行で再利用します。
///
/// # 例
///
/// ```rust
/// use melted_flow::retry::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default()
///     .with_max_attempts(4)
///     .with_initial_delay(Duration::from_millis(100))
///     .with_jitter(0.0);
///
/// assert_eq!(config.base_delay(0), Duration::from_millis(100));
/// assert_eq!(config.base_delay(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む、1以上）
    pub max_attempts: u32,

    /// 初回の待機時間
    pub initial_delay: Duration,

    /// 待機時間の上限
    pub max_delay: Duration,

    /// 試行ごとの待機時間の倍率
    pub multiplier: f64,

    /// ゆらぎの割合（0.0〜1.0）
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// LLM API 呼び出し向けの設定
    pub fn for_llm() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }

    /// ツール実行向けの設定
    pub fn for_tools() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// リトライしない設定（1回だけ試行）
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// 設定値を検証
    ///
    /// # エラー
    ///
    /// - `max_attempts` が0
    /// - `multiplier` が正の有限値でない
    /// - `jitter` が 0.0〜1.0 の範囲外
    /// - `initial_delay` が `max_delay` を超えている
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts は1以上である必要があります".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "retry.multiplier は正の値である必要があります: {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Validation(format!(
                "retry.jitter は 0.0〜1.0 の範囲である必要があります: {}",
                self.jitter
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::Validation(
                "retry.initial_delay が retry.max_delay を超えています".to_string(),
            ));
        }
        Ok(())
    }

    /// ゆらぎを含まない待機時間
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max_nanos = self.max_delay.as_nanos() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        // 非有限値（オーバーフロー）は上限に丸める
        let capped = if nanos.is_finite() { nanos.min(max_nanos) } else { max_nanos };
        Duration::from_nanos(capped.max(0.0).round() as u64)
    }

    /// ゆらぎを含む待機時間
    ///
    /// `jitter = 0` の場合は [`RetryConfig::base_delay`] と一致します。
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }

        let offset: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let factor = 1.0 + jitter * offset;
        Duration::from_nanos((base.as_nanos() as f64 * factor).max(0.0).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_base_delay_grows_and_caps() {
        let config = exact();
        assert_eq!(config.delay(0), Duration::from_millis(100));
        assert_eq!(config.delay(1), Duration::from_millis(200));
        assert_eq!(config.delay(3), Duration::from_millis(800));
        assert_eq!(config.delay(4), Duration::from_secs(1));
        assert_eq!(config.delay(500), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = exact().with_jitter(0.25);
        let base = config.base_delay(2).as_secs_f64();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let d = config.delay(2).as_secs_f64();
            assert!(d >= base * 0.75 - 1e-9, "{} < lower bound", d);
            assert!(d <= base * 1.25 + 1e-9, "{} > upper bound", d);
            seen.insert(config.delay(2));
        }
        assert!(seen.len() > 1, "jittered delays should vary");
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::default().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::default().with_jitter(1.5).validate().is_err());
        assert!(RetryConfig::default().with_multiplier(0.0).validate().is_err());
        assert!(
            RetryConfig::default()
                .with_initial_delay(Duration::from_secs(90))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_no_retry_has_single_attempt() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}

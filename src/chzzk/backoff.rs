use rand::Rng;
use std::time::Duration;

use crate::config::ChatConfig;

/// ジッタの最大割合（待機時間の±20%）
const JITTER_RATIO: f64 = 0.2;

/// 再接続の待機時間を管理する構造体
///
/// 切断が続くたびに待機時間を倍にする（500ms→1s→2s→4s...）。
/// フレームを受信できたら `reset` で初期値に戻す。
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
    jitter: bool,
}

impl ExponentialBackoff {
    /// 設定から作成（ジッタなし）
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay(),
            max_delay: config.reconnect_max_delay(),
            max_attempts: config.max_reconnect_attempts,
            current_attempt: 0,
            jitter: false,
        }
    }

    /// 待機時間にジッタを加える
    ///
    /// 多数のクライアントが同時に再接続するのを避ける。
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// 次の再接続までの待機時間を返す
    ///
    /// base_delay * 2^current_attempt をmax_delayで頭打ちにする
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt.min(16));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        self.current_attempt = self.current_attempt.saturating_add(1);

        if self.jitter && !delay.is_zero() {
            let ratio = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
            let millis = delay.as_millis() as f64 * (1.0 + ratio);
            return Duration::from_millis(millis.max(0.0) as u64).min(self.max_delay);
        }
        delay
    }

    /// カウンターをリセット（フレーム受信時に呼び出す）
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempt_count(&self) -> u32 {
        self.current_attempt
    }

    /// 再接続を続けてよいかどうか
    pub fn should_retry(&self) -> bool {
        self.current_attempt < self.max_attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(base_ms: u64, max_ms: u64, attempts: u32) -> ExponentialBackoff {
        let config = ChatConfig::default().with_reconnect_backoff(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            attempts,
        );
        ExponentialBackoff::from_config(&config)
    }

    #[test]
    fn test_default_progression() {
        let mut backoff = ExponentialBackoff::default();

        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_capped_at_max_delay() {
        let mut backoff = backoff(1000, 5000, 100);

        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut backoff = backoff(1000, 30_000, u32::MAX);
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_reset_allows_retry_again() {
        let mut backoff = backoff(10, 100, 2);

        backoff.next_delay();
        backoff.next_delay();
        assert!(!backoff.should_retry());

        backoff.reset();
        assert!(backoff.should_retry());
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = backoff(1000, 60_000, 10).with_jitter();

        // 1回目: 1000ms ±20%
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_millis(800), "{:?}", delay);
        assert!(delay <= Duration::from_millis(1200), "{:?}", delay);
    }

    #[test]
    fn test_zero_base_delay() {
        let mut backoff = backoff(0, 0, 3).with_jitter();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.attempt_count(), 1);
    }
}

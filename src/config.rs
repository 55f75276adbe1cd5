// =============================================================================
// 共通設定・定数モジュール
// =============================================================================
// チャットクライアント全体で使用する設定値・定数を定義
// =============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTPリクエストのデフォルトタイムアウト（秒）
///
/// ライブ状態取得・アクセストークン発行など REST API へのリクエストで使用。
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// チャットサーバーからの受信待ちタイムアウト（秒）
///
/// サーバーは約60秒無通信で切断するため、それより十分短い値にする。
/// タイムアウトしたらクライアントから ping を送る。
pub const RECEIVE_TIMEOUT_SECS: u64 = 30;

/// チャットサーバーのシャード数
pub const CHAT_SHARD_COUNT: u32 = 9;

/// フレームの `svcid` に入れる固定値
pub const SERVICE_ID: &str = "game";

/// チャットプロトコルのバージョン
pub const PROTOCOL_VERSION: &str = "2";

/// ハンドシェイクで送るデバイス種別コード
pub const DEVICE_TYPE: u32 = 2001;

/// チャンネル情報APIのベースURL
pub const DEFAULT_API_BASE_URL: &str = "https://api.chzzk.naver.com";

/// ユーザー情報・チャット用APIのベースURL
pub const DEFAULT_GAME_BASE_URL: &str = "https://comm-api.game.naver.com";

/// ブロック回避のためのUser-Agent
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTPリクエストのデフォルトタイムアウト（Duration）
pub fn http_timeout() -> Duration {
    Duration::from_secs(HTTP_TIMEOUT_SECS)
}

/// チャンネルIDからシャード番号（1〜CHAT_SHARD_COUNT）を求める
///
/// 文字コードの総和をシャード数で割った余りに1を足す。
pub fn shard_for(chat_channel_id: &str) -> u32 {
    let sum: u64 = chat_channel_id.chars().map(|c| c as u64).sum();
    (sum % CHAT_SHARD_COUNT as u64) as u32 + 1
}

/// シャード番号からチャットサーバーのURLを組み立てる
pub fn shard_url(shard: u32) -> String {
    format!("wss://kr-ss{}.chat.naver.com/chat", shard)
}

/// チャットクライアントの実行時設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// 受信待ちタイムアウト（ミリ秒）
    pub receive_timeout_ms: u64,
    /// 接続先URLの上書き（未指定ならチャンネルIDからシャードを決める）
    pub endpoint: Option<String>,
    /// チャンネル情報APIのベースURL
    pub api_base_url: String,
    /// ユーザー情報・チャット用APIのベースURL
    pub game_base_url: String,
    /// 再接続バックオフの初期待機時間（ミリ秒）
    pub reconnect_base_delay_ms: u64,
    /// 再接続バックオフの最大待機時間（ミリ秒）
    pub reconnect_max_delay_ms: u64,
    /// 連続して接続に失敗できる回数
    pub max_reconnect_attempts: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: RECEIVE_TIMEOUT_SECS * 1000,
            endpoint: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            game_base_url: DEFAULT_GAME_BASE_URL.to_string(),
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
        }
    }
}

impl ChatConfig {
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_game_base_url(mut self, url: impl Into<String>) -> Self {
        self.game_base_url = url.into();
        self
    }

    pub fn with_reconnect_backoff(mut self, base: Duration, max: Duration, attempts: u32) -> Self {
        self.reconnect_base_delay_ms = base.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis() as u64;
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// 接続先URLを決定する
    ///
    /// `endpoint` が設定されていればそれを優先する。
    pub fn endpoint_for(&self, chat_channel_id: &str) -> String {
        match &self.endpoint {
            Some(url) => url.clone(),
            None => shard_url(shard_for(chat_channel_id)),
        }
    }
}

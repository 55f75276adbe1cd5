use serde::{Deserialize, Serialize};

// Chzzk REST API レスポンス型

/// 全APIで共通のレスポンスエンベロープ
#[derive(Debug, Deserialize)]
pub struct Content<T> {
    pub code: i64,
    pub message: Option<String>,
    pub content: Option<T>,
}

/// ライブ状態（live-status）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub live_title: Option<String>,
    /// "OPEN" または "CLOSE"
    pub status: String,
    #[serde(default)]
    pub concurrent_user_count: i64,
    #[serde(default)]
    pub accumulate_count: i64,
    #[serde(default)]
    pub adult: bool,
    /// 配信していない場合はnull
    pub chat_channel_id: Option<String>,
    pub category_type: Option<String>,
    pub live_category: Option<String>,
    pub live_category_value: Option<String>,
    #[serde(default)]
    pub chat_active: bool,
    pub chat_available_group: Option<String>,
    pub chat_available_condition: Option<String>,
    #[serde(default)]
    pub min_follower_minute: i64,
}

impl LiveStatus {
    pub fn is_open(&self) -> bool {
        self.status == "OPEN"
    }
}

/// ログイン中のユーザー情報（getUserStatus）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub has_profile: bool,
    pub user_id_hash: Option<String>,
    pub nickname: Option<String>,
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub verified_mark: bool,
    pub logged_in: Option<bool>,
}

/// チャット用アクセストークン
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    pub temporary_restrict: Option<TemporaryRestrict>,
    #[serde(default)]
    pub real_name_auth: bool,
    pub extra_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryRestrict {
    pub temporary_restrict: bool,
    pub times: i64,
    pub duration: Option<i64>,
    pub created_time: Option<i64>,
}

// チャット管理API リクエスト型

/// 固定メッセージ（公告）設定リクエスト
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeRequest {
    pub channel_id: String,
    pub chat_type: &'static str,
    pub extras: String,
    pub message: String,
    pub message_time: i64,
    pub message_user_id_hash: String,
    pub streaming_channel_id: String,
}

/// 固定メッセージ解除リクエスト
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNoticeRequest {
    pub channel_id: String,
    pub chat_type: &'static str,
}

/// メッセージ非表示（ブラインド）リクエスト
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlindRequest {
    pub channel_id: String,
    pub chat_type: &'static str,
    pub message: String,
    pub message_time: i64,
    pub message_user_id_hash: String,
    pub streaming_channel_id: String,
}

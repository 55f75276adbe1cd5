//! チャットペイロードの型定義
//!
//! サーバーは同じ項目を短い名前（`msg`, `ctime`）と長い名前（`content`, `createTime`）の
//! どちらでも送ってくるため、両方をaliasで受け付ける。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::de;
use super::frame::AuthMode;

/// チャット内のユーザー権限
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "common_user")]
    CommonUser,
    #[serde(rename = "streamer")]
    Streamer,
    #[serde(rename = "streaming_chat_manager")]
    ChatManager,
    #[serde(rename = "streaming_channel_manager")]
    ChannelManager,
    #[serde(rename = "manager")]
    Manager,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeImage {
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Title {
    pub name: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBadge {
    pub badge_no: i64,
    pub badge_id: String,
    pub image_url: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub activated: bool,
}

/// 発言者のプロフィール
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id_hash: Option<String>,
    #[serde(default)]
    pub nickname: String,
    pub profile_image_url: Option<String>,
    #[serde(rename = "userRoleCode")]
    pub user_role: Option<UserRole>,
    pub badge: Option<BadgeImage>,
    pub title: Option<Title>,
    #[serde(default)]
    pub verified_mark: bool,
    #[serde(default)]
    pub activity_badges: Vec<ActivityBadge>,
    pub streaming_property: Option<Value>,
}

impl Profile {
    /// 称号の色
    pub fn color(&self) -> Option<&str> {
        self.title.as_ref().and_then(|t| t.color.as_deref())
    }
}

/// 通常チャットのextras
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extra {
    pub chat_type: Option<String>,
    pub emojis: Option<Value>,
    /// "PC" / "AOS" / "IOS"
    pub os_type: Option<String>,
    pub streaming_channel_id: Option<String>,
}

/// 固定メッセージのextras
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeExtra {
    #[serde(flatten)]
    pub extra: Extra,
    pub register_profile: Option<Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRank {
    pub user_id_hash: String,
    #[serde(alias = "nickName")]
    pub nickname: String,
    #[serde(default)]
    pub verified_mark: bool,
    pub donation_amount: i64,
    pub ranking: i64,
}

/// 投げ銭の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonationKind {
    Chat,
    Video,
    Mission,
    Other,
}

fn default_true() -> bool {
    true
}

/// 投げ銭のextras
///
/// ミッション投げ銭は `donationType` が "VIDEO" のまま届くことがあるため、
/// 種別は `kind()` でミッション項目の有無も見て判定する。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationExtra {
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
    pub pay_type: Option<String>,
    #[serde(default)]
    pub pay_amount: i64,
    #[serde(default)]
    pub donation_type: String,
    pub weekly_rank_list: Option<Vec<DonationRank>>,
    pub donation_user_weekly_rank: Option<DonationRank>,
    pub duration_time: Option<i64>,
    pub mission_donation_id: Option<String>,
    pub mission_created_time: Option<String>,
    pub mission_end_time: Option<String>,
    pub mission_text: Option<String>,
    /// PENDING / REJECTED / ALLOW
    pub status: Option<String>,
    pub success: Option<bool>,
}

impl DonationExtra {
    pub fn kind(&self) -> DonationKind {
        if self.donation_type == "MISSION" || self.mission_donation_id.is_some() {
            return DonationKind::Mission;
        }
        match self.donation_type.as_str() {
            "CHAT" => DonationKind::Chat,
            "VIDEO" => DonationKind::Video,
            _ => DonationKind::Other,
        }
    }
}

/// 定期購読のextras
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionExtra {
    pub month: i64,
    pub tier_name: Option<String>,
    pub nickname: Option<String>,
    pub tier_no: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemExtraParameter {
    pub register_nickname: Option<String>,
    pub target_nickname: Option<String>,
    #[serde(rename = "registerChatProfileJson", default, deserialize_with = "de::embedded_json")]
    pub register_chat_profile: Option<Profile>,
    #[serde(rename = "targetChatProfileJson", default, deserialize_with = "de::embedded_json")]
    pub target_profile: Option<Profile>,
}

/// システムメッセージのextras
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemExtra {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub style_type: i64,
    #[serde(default)]
    pub visible_roles: Vec<String>,
    pub params: Option<SystemExtraParameter>,
}

/// チャットメッセージ共通の型
///
/// `extras` の型だけがメッセージ種別ごとに異なる
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(deserialize = "E: DeserializeOwned", serialize = "E: Serialize")
)]
pub struct Message<E> {
    #[serde(alias = "svcid", default)]
    pub service_id: Option<String>,
    #[serde(alias = "cid", default)]
    pub channel_id: Option<String>,
    #[serde(alias = "uid")]
    pub user_id: String,
    #[serde(default, deserialize_with = "de::embedded_json")]
    pub profile: Option<Profile>,
    #[serde(alias = "msg", default)]
    pub content: String,
    #[serde(rename = "messageTypeCode", alias = "msgTypeCode")]
    pub message_type: i64,
    #[serde(default, deserialize_with = "de::embedded_json")]
    pub extras: Option<E>,
    #[serde(rename = "createTime", alias = "ctime", deserialize_with = "de::timestamp")]
    pub created_time: DateTime<Utc>,
    #[serde(
        rename = "updateTime",
        alias = "utime",
        default,
        deserialize_with = "de::optional_timestamp"
    )]
    pub updated_time: Option<DateTime<Utc>>,
    #[serde(rename = "messageTime", alias = "msgTime", deserialize_with = "de::timestamp")]
    pub time: DateTime<Utc>,
    #[serde(alias = "mbrCnt", default)]
    pub member_count: Option<i64>,
    #[serde(rename = "messageStatusType", alias = "msgStatusType", default)]
    pub message_status: Option<String>,
}

impl<E> Message<E> {
    pub fn is_blind(&self) -> bool {
        self.message_status.as_deref() == Some("BLIND")
    }

    /// 指定ユーザーの発言かどうか
    pub fn is_from(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

pub type ChatMessage = Message<Extra>;
pub type NoticeMessage = Message<NoticeExtra>;
pub type DonationMessage = Message<DonationExtra>;
pub type SubscriptionMessage = Message<SubscriptionExtra>;
pub type SystemMessage = Message<SystemExtra>;

/// 過去チャット応答
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChat {
    #[serde(default)]
    pub message_list: Vec<ChatMessage>,
    pub user_count: Option<i64>,
    pub notice: Option<NoticeMessage>,
}

/// メッセージ非表示通知
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blind {
    pub service_id: Option<String>,
    #[serde(rename = "messageTime", deserialize_with = "de::timestamp")]
    pub time: DateTime<Utc>,
    pub blind_type: String,
    pub blind_user_id: Option<String>,
    pub user_id: String,
    pub message: Option<String>,
}

/// 接続完了応答の本体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedInfo {
    #[serde(rename = "sid")]
    pub session_id: String,
    #[serde(rename = "accTkn", default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthMode>,
    #[serde(default)]
    pub uuid: Option<String>,
}

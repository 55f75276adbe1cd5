//! ワイヤーフレーム（WebSocket上でやり取りする1つのJSONメッセージ）

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::cmd::{chat_type, tid, ChatCmd, Command};
use super::de;
use crate::config::{DEVICE_TYPE, PROTOCOL_VERSION, SERVICE_ID};

/// 認証モード
///
/// ユーザーIDがある場合のみ `Send`（チャット送信可能）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMode {
    Send,
    Read,
}

impl AuthMode {
    pub fn for_user(user_id: Option<&str>) -> Self {
        match user_id {
            Some(_) => AuthMode::Send,
            None => AuthMode::Read,
        }
    }
}

/// 1フレーム分のメッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub cmd: i64,
    #[serde(rename = "bdy", default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(rename = "cid", default, skip_serializing_if = "Option::is_none")]
    pub chat_channel_id: Option<String>,
    #[serde(rename = "svcid", default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub ver: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub tid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
    #[serde(rename = "retCode", alias = "ret_code", default, skip_serializing)]
    pub ret_code: Option<i64>,
    #[serde(rename = "retMsg", alias = "ret_msg", default, skip_serializing)]
    pub ret_msg: Option<String>,
}

impl Frame {
    /// 本体なしのフレーム
    fn bare(cmd: ChatCmd) -> Self {
        Self {
            cmd: cmd.code(),
            body: None,
            chat_channel_id: None,
            service_id: None,
            ver: Some(PROTOCOL_VERSION.to_string()),
            tid: None,
            sid: None,
            retry: None,
            ret_code: None,
            ret_msg: None,
        }
    }

    /// チャンネル宛てのフレーム（svcid・cid・tidを含む）
    fn addressed(cmd: ChatCmd, chat_channel_id: &str, tid: u32, body: Value) -> Self {
        Self {
            body: Some(body),
            chat_channel_id: Some(chat_channel_id.to_string()),
            service_id: Some(SERVICE_ID.to_string()),
            tid: Some(tid),
            ..Self::bare(cmd)
        }
    }

    pub fn ping() -> Self {
        Self::bare(ChatCmd::Ping)
    }

    pub fn pong() -> Self {
        Self::bare(ChatCmd::Pong)
    }

    /// 接続（ハンドシェイク）フレーム
    pub fn handshake(
        access_token: &str,
        chat_channel_id: &str,
        mode: AuthMode,
        user_id: Option<&str>,
    ) -> Self {
        let body = json!({
            "accTkn": access_token,
            "auth": mode,
            "devType": DEVICE_TYPE,
            "uid": user_id,
        });
        Self::addressed(ChatCmd::Connect, chat_channel_id, tid::HANDSHAKE, body)
    }

    /// チャット送信フレーム
    ///
    /// `extras` はJSON文字列として埋め込む
    pub fn send_chat(
        message: &str,
        chat_channel_id: &str,
        session_id: Option<&str>,
        message_time_ms: i64,
    ) -> Self {
        let extras = json!({
            "chatType": "STREAMING",
            "emojis": "",
            "osType": "PC",
            "streamingChannelId": chat_channel_id,
        });
        let body = json!({
            "extras": extras.to_string(),
            "msg": message,
            "msgTime": message_time_ms,
            "msgTypeCode": chat_type::TEXT,
        });
        Self {
            sid: session_id.map(str::to_string),
            retry: Some(false),
            ..Self::addressed(ChatCmd::SendChat, chat_channel_id, tid::SEND_CHAT, body)
        }
    }

    /// 過去チャット要求フレーム
    pub fn request_recent_chat(count: u32, chat_channel_id: &str, session_id: Option<&str>) -> Self {
        let body = json!({ "recentMessageCount": count });
        Self {
            sid: session_id.map(str::to_string),
            ..Self::addressed(ChatCmd::RequestRecentChat, chat_channel_id, tid::RECENT_CHAT, body)
        }
    }

    pub fn command(&self) -> Command {
        Command::from_code(self.cmd)
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

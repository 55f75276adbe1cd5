//! ディスパッチャーに流れるデコード済みイベント

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use super::cmd::ChatCmd;
use super::types::{
    Blind, ChatMessage, ConnectedInfo, DonationMessage, NoticeMessage, RecentChat,
    SubscriptionMessage, SystemMessage,
};
use crate::chzzk::errors::ChzzkError;

/// イベント名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Chat,
    Donation,
    Subscription,
    SystemMessage,
    RecentChat,
    Notice,
    Pin,
    Unpin,
    Blind,
    Kick,
    Block,
    Penalty,
    Event,
    Unknown,
    ClientError,
}

impl EventKind {
    pub const ALL: [EventKind; 17] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::Chat,
        EventKind::Donation,
        EventKind::Subscription,
        EventKind::SystemMessage,
        EventKind::RecentChat,
        EventKind::Notice,
        EventKind::Pin,
        EventKind::Unpin,
        EventKind::Blind,
        EventKind::Kick,
        EventKind::Block,
        EventKind::Penalty,
        EventKind::Event,
        EventKind::Unknown,
        EventKind::ClientError,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Chat => "chat",
            EventKind::Donation => "donation",
            EventKind::Subscription => "subscription",
            EventKind::SystemMessage => "system_message",
            EventKind::RecentChat => "recent_chat",
            EventKind::Notice => "notice",
            EventKind::Pin => "pin",
            EventKind::Unpin => "unpin",
            EventKind::Blind => "blind",
            EventKind::Kick => "kick",
            EventKind::Block => "block",
            EventKind::Penalty => "penalty",
            EventKind::Event => "event",
            EventKind::Unknown => "unknown",
            EventKind::ClientError => "client_error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    /// `"chat"` と `"on_chat"` のどちらでも受け付ける
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        let name = lowered.strip_prefix("on_").unwrap_or(&lowered);
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| format!("Unknown event name: {}", s))
    }
}

/// `client_error` イベントの中身
#[derive(Debug, Clone)]
pub struct ClientError {
    pub error: Arc<ChzzkError>,
    /// デコードに失敗した生のペイロード
    pub payload: Option<Value>,
    /// 失敗したコールバックが受け取ったイベント
    pub source: Option<EventKind>,
}

impl ClientError {
    pub fn new(error: ChzzkError) -> Self {
        Self {
            error: Arc::new(error),
            payload: None,
            source: None,
        }
    }

    pub fn with_source(mut self, source: EventKind) -> Self {
        self.source = Some(source);
        self
    }
}

/// デコード済みイベント
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Connect(ConnectedInfo),
    Disconnect { code: Option<u16> },
    Chat(ChatMessage),
    Donation(DonationMessage),
    Subscription(SubscriptionMessage),
    SystemMessage(SystemMessage),
    RecentChat(RecentChat),
    Notice(NoticeMessage),
    Pin(NoticeMessage),
    Unpin,
    Blind(Blind),
    /// 専用のデコーダーを持たない既知コマンド（kick / block / penalty / event）
    Command { cmd: ChatCmd, body: Option<Value> },
    /// 未知のコマンドコード
    Unknown { cmd: i64, body: Option<Value> },
    ClientError(ClientError),
}

impl ChatEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChatEvent::Connect(_) => EventKind::Connect,
            ChatEvent::Disconnect { .. } => EventKind::Disconnect,
            ChatEvent::Chat(_) => EventKind::Chat,
            ChatEvent::Donation(_) => EventKind::Donation,
            ChatEvent::Subscription(_) => EventKind::Subscription,
            ChatEvent::SystemMessage(_) => EventKind::SystemMessage,
            ChatEvent::RecentChat(_) => EventKind::RecentChat,
            ChatEvent::Notice(_) => EventKind::Notice,
            ChatEvent::Pin(_) => EventKind::Pin,
            ChatEvent::Unpin => EventKind::Unpin,
            ChatEvent::Blind(_) => EventKind::Blind,
            ChatEvent::Command { cmd, .. } => match cmd {
                ChatCmd::Kick => EventKind::Kick,
                ChatCmd::Block => EventKind::Block,
                ChatCmd::Penalty => EventKind::Penalty,
                ChatCmd::Event => EventKind::Event,
                _ => EventKind::Unknown,
            },
            ChatEvent::Unknown { .. } => EventKind::Unknown,
            ChatEvent::ClientError(_) => EventKind::ClientError,
        }
    }

    pub fn client_error(error: ChzzkError, payload: Option<Value>) -> Self {
        let mut err = ClientError::new(error);
        err.payload = payload;
        ChatEvent::ClientError(err)
    }

    pub fn as_chat(&self) -> Option<&ChatMessage> {
        match self {
            ChatEvent::Chat(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_donation(&self) -> Option<&DonationMessage> {
        match self {
            ChatEvent::Donation(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_recent_chat(&self) -> Option<&RecentChat> {
        match self {
            ChatEvent::RecentChat(recent) => Some(recent),
            _ => None,
        }
    }

    /// notice / pin のどちらでも固定メッセージを返す
    pub fn as_notice(&self) -> Option<&NoticeMessage> {
        match self {
            ChatEvent::Notice(msg) | ChatEvent::Pin(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn as_client_error(&self) -> Option<&ClientError> {
        match self {
            ChatEvent::ClientError(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_recent_chat(self) -> Option<RecentChat> {
        match self {
            ChatEvent::RecentChat(recent) => Some(recent),
            _ => None,
        }
    }
}

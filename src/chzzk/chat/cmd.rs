//! チャットプロトコルのコマンド・メッセージ種別
//!
//! フレームの `cmd` とメッセージの `msgTypeCode` は整数で届く。
//! 未知の値でもエラーにせず、生の整数として扱う。

use std::fmt;

/// コマンドコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatCmd {
    Ping,
    Pong,
    Connect,
    Connected,
    RequestRecentChat,
    RecentChat,
    Event,
    Chat,
    /// 投げ銭・システムメッセージ
    SpecialChat,
    Kick,
    Block,
    Blind,
    Notice,
    Penalty,
    SendChat,
}

impl ChatCmd {
    /// 既知のコマンド一覧
    pub const ALL: [ChatCmd; 15] = [
        ChatCmd::Ping,
        ChatCmd::Pong,
        ChatCmd::Connect,
        ChatCmd::Connected,
        ChatCmd::RequestRecentChat,
        ChatCmd::RecentChat,
        ChatCmd::Event,
        ChatCmd::Chat,
        ChatCmd::SpecialChat,
        ChatCmd::Kick,
        ChatCmd::Block,
        ChatCmd::Blind,
        ChatCmd::Notice,
        ChatCmd::Penalty,
        ChatCmd::SendChat,
    ];

    pub const fn code(self) -> i64 {
        match self {
            ChatCmd::Ping => 0,
            ChatCmd::Pong => 10000,
            ChatCmd::Connect => 100,
            ChatCmd::Connected => 10100,
            ChatCmd::RequestRecentChat => 5101,
            ChatCmd::RecentChat => 15101,
            ChatCmd::Event => 93006,
            ChatCmd::Chat => 93101,
            ChatCmd::SpecialChat => 93102,
            ChatCmd::Kick => 94005,
            ChatCmd::Block => 94006,
            ChatCmd::Blind => 94008,
            ChatCmd::Notice => 94010,
            ChatCmd::Penalty => 94015,
            ChatCmd::SendChat => 3101,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|cmd| cmd.code() == code)
    }

    pub const fn name(self) -> &'static str {
        match self {
            ChatCmd::Ping => "PING",
            ChatCmd::Pong => "PONG",
            ChatCmd::Connect => "CONNECT",
            ChatCmd::Connected => "CONNECTED",
            ChatCmd::RequestRecentChat => "REQUEST_RECENT_CHAT",
            ChatCmd::RecentChat => "RECENT_CHAT",
            ChatCmd::Event => "EVENT",
            ChatCmd::Chat => "CHAT",
            ChatCmd::SpecialChat => "SPECIAL_CHAT",
            ChatCmd::Kick => "KICK",
            ChatCmd::Block => "BLOCK",
            ChatCmd::Blind => "BLIND",
            ChatCmd::Notice => "NOTICE",
            ChatCmd::Penalty => "PENALTY",
            ChatCmd::SendChat => "SEND_CHAT",
        }
    }
}

impl fmt::Display for ChatCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// フレームのコマンド（未知のコードはそのまま保持）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Known(ChatCmd),
    Unknown(i64),
}

impl Command {
    pub fn from_code(code: i64) -> Self {
        match ChatCmd::from_code(code) {
            Some(cmd) => Command::Known(cmd),
            None => Command::Unknown(code),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Command::Known(cmd) => cmd.code(),
            Command::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Known(cmd) => cmd.fmt(f),
            Command::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// メッセージ種別コード（msgTypeCode / messageTypeCode）
pub mod chat_type {
    pub const TEXT: i64 = 1;
    pub const IMAGE: i64 = 2;
    pub const STICKER: i64 = 3;
    pub const VIDEO: i64 = 4;
    pub const RICH: i64 = 5;
    pub const DONATION: i64 = 10;
    pub const SUBSCRIPTION: i64 = 11;
    pub const SYSTEM_MESSAGE: i64 = 30;
    pub const OPEN: i64 = 121;
}

/// 送信フレームの `tid`（送信種別ごとの固定値）
pub mod tid {
    pub const HANDSHAKE: u32 = 1;
    pub const RECENT_CHAT: u32 = 2;
    pub const SEND_CHAT: u32 = 3;
}

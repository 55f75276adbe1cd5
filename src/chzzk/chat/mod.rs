// =============================================================================
// チャットモジュール
// =============================================================================
// チャットサーバーとのWebSocketセッションを管理する
//
// 構成:
// - cmd: コマンドコード・メッセージ種別コードの対応表
// - gateway: 物理接続1本分の送受信
// - router: 受信フレームのデコードとプロトコル処理（セッションID記録・pong応答）
// - dispatcher: wait_for（1回限り）と on（永続購読）へのイベント配信
// - client: セッションループとアプリケーション向けAPI
// =============================================================================

pub mod client;
pub mod cmd;
mod de;
pub mod dispatcher;
pub mod event;
pub mod frame;
pub mod gateway;
pub mod router;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod test_server;

pub use client::{ChatClient, DEFAULT_RECENT_CHAT_COUNT};
pub use cmd::{ChatCmd, Command};
pub use dispatcher::{Dispatcher, SubscriptionId};
pub use event::{ChatEvent, ClientError, EventKind};
pub use frame::{AuthMode, Frame};
pub use types::{
    Blind, ChatMessage, ConnectedInfo, DonationKind, DonationMessage, NoticeMessage, Profile,
    RecentChat, SubscriptionMessage, SystemMessage,
};

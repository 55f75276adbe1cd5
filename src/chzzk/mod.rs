// =============================================================================
// Chzzk連携モジュール
// =============================================================================
// Chzzk（NAVERのライブ配信サービス）のチャットに接続する
//
// 機能:
// - REST API: ライブ状態・ユーザー情報・チャット用アクセストークン・固定/非表示操作
// - チャット: WebSocket接続、コマンドのデコード、イベント配信、自動再接続
// =============================================================================

pub mod backoff;
pub mod chat;
pub mod client;
pub mod errors;
pub mod types;

pub use client::ChzzkClient;
pub use errors::ChzzkError;

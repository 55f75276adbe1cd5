//! チャットクライアント（セッションループとアプリケーション向けAPI）

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};

use super::dispatcher::{Dispatcher, SubscriptionId};
use super::event::{ChatEvent, EventKind};
use super::frame::{AuthMode, Frame};
use super::gateway::{CloseKind, Connection, Gateway, GatewaySender, Received};
use super::router::{ConnectionRouter, RecordDecoder};
use super::state::{Credential, SessionState};
use super::types::ChatMessage;
use crate::chzzk::backoff::ExponentialBackoff;
use crate::chzzk::client::ChzzkClient;
use crate::chzzk::errors::ChzzkError;
use crate::chzzk::types::{BlindRequest, NoticeRequest};
use crate::config::ChatConfig;
use crate::util::{mask_secret, now_millis};

/// 過去チャットの既定取得件数
pub const DEFAULT_RECENT_CHAT_COUNT: u32 = 50;

const STREAMING: &str = "STREAMING";

/// 受信ループの終了理由
enum LoopEnd {
    /// `close()` が呼ばれた
    Shutdown,
    /// 正常終了のクローズコード
    Terminal,
    /// 再接続する
    Recoverable(Option<u16>),
    /// 再試行しないエラー
    Fatal(ChzzkError),
}

struct Inner {
    channel_id: String,
    config: ChatConfig,
    http: ChzzkClient,
    state: Arc<SessionState>,
    dispatcher: Dispatcher,
    router: ConnectionRouter,
    sender: RwLock<Option<GatewaySender>>,
    shutdown: watch::Sender<bool>,
    /// セッションループが動いている間true
    running: AtomicBool,
}

/// `running` フラグを保持し、drop時に下ろす
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ChzzkError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| Self(flag))
            .map_err(|_| ChzzkError::AlreadyConnected)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Chzzkチャットクライアント
///
/// Clone可能で、受信ループ（`run`）を別タスクで動かしたまま
/// 他のタスクから `send_chat` などを呼び出せる。
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

/// `close()` されるまで待つ
async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl ChatClient {
    /// 新しいクライアントを作成
    ///
    /// # 引数
    /// - `channel_id`: 配信者のチャンネルID
    pub fn new(channel_id: impl Into<String>, config: ChatConfig) -> Result<Self, ChzzkError> {
        let http = ChzzkClient::new(&config)?;
        let state = Arc::new(SessionState::default());
        let dispatcher = Dispatcher::new();
        let router = ConnectionRouter::new(state.clone(), dispatcher.clone());
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                channel_id: channel_id.into(),
                config,
                http,
                state,
                dispatcher,
                router,
                sender: RwLock::new(None),
                shutdown,
                running: AtomicBool::new(false),
            }),
        })
    }

    /// チャットチャンネルIDを指定する（ライブ状態の問い合わせを省略）
    pub fn with_chat_channel_id(self, chat_channel_id: impl Into<String>) -> Self {
        self.inner.state.set_chat_channel_id(chat_channel_id.into());
        self
    }

    /// ログイン情報（NID_AUT / NID_SES）を設定
    pub fn login(&self, authorization_key: &str, session_key: &str) {
        self.inner.http.login(authorization_key, session_key);
    }

    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    pub fn http(&self) -> &ChzzkClient {
        &self.inner.http
    }

    pub fn chat_channel_id(&self) -> Option<String> {
        self.inner.state.chat_channel_id()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.session_id()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.credential().map(|c| c.access_token)
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.state.credential().and_then(|c| c.user_id)
    }

    /// 認証モード（未取得ならNone）
    pub fn mode(&self) -> Option<AuthMode> {
        self.inner.state.credential().map(|c| c.mode)
    }

    /// アクセストークンを破棄し、次に新規セッションを張るときに再取得させる
    pub fn invalidate_access_token(&self) {
        log::info!("Chat access token invalidated");
        self.inner.state.invalidate_credential();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// 接続完了まで待つ
    pub async fn wait_until_connected(&self) -> Result<(), ChzzkError> {
        let mut connected = self.inner.state.subscribe_connected();
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            if *connected.borrow_and_update() {
                return Ok(());
            }
            if self.is_closed() {
                return Err(ChzzkError::Closed);
            }
            tokio::select! {
                changed = connected.changed() => changed.map_err(|_| ChzzkError::Closed)?,
                _ = shutdown_signal(&mut shutdown) => return Err(ChzzkError::Closed),
            }
        }
    }

    // ========================================
    // イベント
    // ========================================

    /// イベントの永続購読を登録
    pub fn on<F, Fut, E>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(ChatEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        self.inner.dispatcher.on(kind, callback)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.dispatcher.off(id)
    }

    /// 全イベントを配信順に受け取る
    pub fn events(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        self.inner.dispatcher.events()
    }

    /// 条件を満たすイベントを1回だけ待つ
    pub fn wait_for<P>(
        &self,
        kind: EventKind,
        predicate: P,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ChatEvent, ChzzkError>> + Send + 'static
    where
        P: Fn(&ChatEvent) -> bool + Send + 'static,
    {
        self.inner.dispatcher.wait_for(kind, predicate, timeout)
    }

    pub fn wait_for_checked<P, E>(
        &self,
        kind: EventKind,
        predicate: P,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ChatEvent, ChzzkError>> + Send + 'static
    where
        P: Fn(&ChatEvent) -> Result<bool, E> + Send + 'static,
        E: std::fmt::Display + 'static,
    {
        self.inner.dispatcher.wait_for_checked(kind, predicate, timeout)
    }

    /// チャットのメッセージ種別コードにデコーダーを追加
    pub fn register_decoder(&self, type_code: i64, decoder: RecordDecoder) -> Option<RecordDecoder> {
        self.inner.router.register_decoder(type_code, decoder)
    }

    // ========================================
    // セッションループ
    // ========================================

    /// 接続してから `close()` されるまで動かし、最後に後片付けをする
    pub async fn run(&self) -> Result<(), ChzzkError> {
        let result = self.connect().await;
        if let Err(e) = &result {
            log::error!("Chat client stopped: {}", e);
        }
        self.close().await;
        result
    }

    /// チャットサーバーに接続し、切断されるまで受信を続ける
    ///
    /// 正常終了のクローズコードか `close()` でOkを返す。正常終了の場合は
    /// クライアント自体も閉じる。
    /// チャンネルの解決・トークン取得の失敗はそのまま返す（再試行しない）。
    /// エラー時に待機中の `wait_for` まで失敗させたい場合は `run` を使う。
    ///
    /// 同じクライアントで既に接続処理が動いている場合は `AlreadyConnected`。
    pub async fn connect(&self) -> Result<(), ChzzkError> {
        if self.is_closed() {
            return Err(ChzzkError::Closed);
        }
        let _running = RunningGuard::acquire(&self.inner.running)?;
        let chat_channel_id = self.resolve_chat_channel_id().await?;
        self.ensure_credential(&chat_channel_id).await?;
        self.session_loop(&chat_channel_id).await
    }

    async fn resolve_chat_channel_id(&self) -> Result<String, ChzzkError> {
        if let Some(id) = self.inner.state.chat_channel_id() {
            return Ok(id);
        }
        let status = self.inner.http.live_status(&self.inner.channel_id).await?;
        let chat_channel_id = status
            .and_then(|s| s.chat_channel_id)
            .ok_or(ChzzkError::ChannelNotLive)?;
        log::info!(
            "Resolved chat channel {} for channel {}",
            chat_channel_id,
            self.inner.channel_id
        );
        self.inner.state.set_chat_channel_id(chat_channel_id.clone());
        Ok(chat_channel_id)
    }

    /// アクセストークンが無ければ取得する
    async fn ensure_credential(&self, chat_channel_id: &str) -> Result<Credential, ChzzkError> {
        if let Some(credential) = self.inner.state.credential() {
            return Ok(credential);
        }

        let user_id = if self.inner.http.has_login() {
            self.inner.http.user().await?.user_id_hash
        } else {
            None
        };
        let token = self.inner.http.chat_access_token(chat_channel_id).await?;
        log::info!(
            "Acquired chat access token {} (user={})",
            mask_secret(&token.access_token),
            user_id.as_deref().unwrap_or("-")
        );

        let credential = Credential::new(token.access_token, user_id);
        self.inner.state.set_credential(credential.clone());
        Ok(credential)
    }

    async fn session_loop(&self, chat_channel_id: &str) -> Result<(), ChzzkError> {
        let config = &self.inner.config;
        let mut backoff = ExponentialBackoff::from_config(config).with_jitter();
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            let session_id = self.inner.state.session_id();
            let opened = tokio::select! {
                _ = shutdown_signal(&mut shutdown) => return Ok(()),
                opened = Gateway::open(config, chat_channel_id, session_id) => opened,
            };
            let mut conn = match opened {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("Failed to open chat socket: {}", e);
                    if !Self::wait_before_reconnect(&mut backoff, &mut shutdown).await? {
                        return Ok(());
                    }
                    continue;
                }
            };

            // 接続済みフラグより先に送信ハンドルを置く
            *self.inner.sender.write().await = Some(conn.sender.clone());
            let end = match self.start_session(&conn, chat_channel_id).await {
                Ok(()) => self.receive_loop(&mut conn, &mut backoff, &mut shutdown).await,
                Err(e @ (ChzzkError::HttpError(_)
                | ChzzkError::ApiError { .. }
                | ChzzkError::NotFound(_)
                | ChzzkError::LoginRequired)) => LoopEnd::Fatal(e),
                Err(e) => {
                    log::warn!("Failed to start chat session: {}", e);
                    LoopEnd::Recoverable(None)
                }
            };

            self.inner.sender.write().await.take();
            conn.sender.close().await;
            self.inner.state.set_connected(false);

            match end {
                LoopEnd::Shutdown => return Ok(()),
                LoopEnd::Terminal => {
                    log::info!("Chat socket closed normally");
                    self.close().await;
                    return Ok(());
                }
                LoopEnd::Fatal(e) => return Err(e),
                LoopEnd::Recoverable(code) => {
                    log::info!("Chat socket disconnected (code={:?}), reconnecting", code);
                    self.inner.dispatcher.dispatch(ChatEvent::Disconnect { code });
                    if !Self::wait_before_reconnect(&mut backoff, &mut shutdown).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// 新規セッションならハンドシェイクを送る
    ///
    /// セッションIDを保持している場合は何も送らない（その接続自体が再開の合図）
    async fn start_session(&self, conn: &Connection, chat_channel_id: &str) -> Result<(), ChzzkError> {
        if conn.session_id.is_some() {
            log::info!("Resuming chat session without handshake");
            self.inner.state.set_connected(true);
            return Ok(());
        }
        let credential = self.ensure_credential(chat_channel_id).await?;
        log::info!("Sending handshake (mode={:?})", credential.mode);
        conn.send_handshake(
            &credential.access_token,
            chat_channel_id,
            credential.mode,
            credential.user_id.as_deref(),
        )
        .await
    }

    async fn receive_loop(
        &self,
        conn: &mut Connection,
        backoff: &mut ExponentialBackoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> LoopEnd {
        let timeout = self.inner.config.receive_timeout();
        loop {
            let received = tokio::select! {
                _ = shutdown_signal(shutdown) => return LoopEnd::Shutdown,
                received = conn.receiver.receive_one(timeout) => received,
            };

            match received {
                Received::Frame(frame) => {
                    backoff.reset();
                    match self.inner.router.route(frame) {
                        Ok(Some(reply)) => {
                            if let Err(e) = conn.sender.send(&reply).await {
                                log::warn!("Failed to send reply: {}", e);
                                return LoopEnd::Recoverable(None);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => return LoopEnd::Fatal(e),
                    }
                }
                Received::Timeout => {
                    log::debug!("Timeout receiving packet. Send ping for keep-alive");
                    if let Err(e) = conn.sender.send(&Frame::ping()).await {
                        log::warn!("Failed to send ping: {}", e);
                        return LoopEnd::Recoverable(None);
                    }
                }
                Received::Invalid { raw, error } => {
                    log::warn!("Ignoring malformed frame: {}", error);
                    self.inner.dispatcher.dispatch(ChatEvent::client_error(
                        ChzzkError::ParseError(error),
                        Some(serde_json::Value::String(raw)),
                    ));
                }
                Received::Closed(CloseKind::Normal) => return LoopEnd::Terminal,
                Received::Closed(CloseKind::Recoverable(code)) => return LoopEnd::Recoverable(code),
                Received::Error(e) => {
                    log::warn!("Chat socket error: {}", e);
                    return LoopEnd::Recoverable(None);
                }
            }
        }
    }

    /// 再接続前の待機
    ///
    /// `close()` された場合はfalse、上限を超えた場合は `ReconnectExhausted` を返す
    async fn wait_before_reconnect(
        backoff: &mut ExponentialBackoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, ChzzkError> {
        if !backoff.should_retry() {
            log::error!("Max reconnect attempts exceeded");
            return Err(ChzzkError::ReconnectExhausted(backoff.attempt_count()));
        }
        let delay = backoff.next_delay();
        log::info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            backoff.attempt_count()
        );
        tokio::select! {
            _ = shutdown_signal(shutdown) => Ok(false),
            _ = tokio::time::sleep(delay) => Ok(true),
        }
    }

    /// 接続を閉じる
    ///
    /// 受信ループを止め、待機中の `wait_for` を `Closed` で失敗させる。
    /// 実行中のコールバックはそのまま完了させる。
    pub async fn close(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        log::info!("Closing chat client");
        self.inner.state.set_connected(false);
        let sender = self.inner.sender.write().await.take();
        if let Some(sender) = sender {
            sender.close().await;
        }
        self.inner.dispatcher.close();
    }

    // ========================================
    // チャット操作
    // ========================================

    /// 接続中の送信ハンドル
    async fn connected_sender(&self) -> Result<GatewaySender, ChzzkError> {
        if !self.is_connected() {
            return Err(ChzzkError::NotConnected);
        }
        self.inner
            .sender
            .read()
            .await
            .clone()
            .ok_or(ChzzkError::NotConnected)
    }

    fn connected_chat_channel_id(&self) -> Result<String, ChzzkError> {
        self.inner
            .state
            .chat_channel_id()
            .ok_or(ChzzkError::NotConnected)
    }

    /// チャットを送信（ログインが必要）
    pub async fn send_chat(&self, message: &str) -> Result<(), ChzzkError> {
        let sender = self.connected_sender().await?;
        if self.user_id().is_none() {
            return Err(ChzzkError::LoginRequired);
        }
        let chat_channel_id = self.connected_chat_channel_id()?;
        let session_id = self.session_id();
        sender
            .send(&Frame::send_chat(
                message,
                &chat_channel_id,
                session_id.as_deref(),
                now_millis(),
            ))
            .await
    }

    /// 過去チャットを要求する（結果は `recent_chat` イベントで届く）
    pub async fn request_recent_chat(&self, count: u32) -> Result<(), ChzzkError> {
        let sender = self.connected_sender().await?;
        let chat_channel_id = self.connected_chat_channel_id()?;
        let session_id = self.session_id();
        sender
            .send(&Frame::request_recent_chat(
                count,
                &chat_channel_id,
                session_id.as_deref(),
            ))
            .await
    }

    /// 過去チャットを取得する
    pub async fn history(&self, count: u32) -> Result<Vec<ChatMessage>, ChzzkError> {
        let limit = count as usize;
        let waiting = self.wait_for(
            EventKind::RecentChat,
            move |event| {
                event
                    .as_recent_chat()
                    .map_or(false, |recent| recent.message_list.len() <= limit)
            },
            Some(self.inner.config.receive_timeout()),
        );
        self.request_recent_chat(count).await?;

        waiting
            .await?
            .into_recent_chat()
            .map(|recent| recent.message_list)
            .ok_or_else(|| ChzzkError::decode("RECENT_CHAT", "unexpected event"))
    }

    /// メッセージを固定する
    pub async fn set_notice_message(&self, message: &ChatMessage) -> Result<(), ChzzkError> {
        let chat_channel_id = self.connected_chat_channel_id()?;
        let extras = match &message.extras {
            Some(extras) => serde_json::to_string(extras)?,
            None => "{}".to_string(),
        };
        let streaming_channel_id = message
            .extras
            .as_ref()
            .and_then(|e| e.streaming_channel_id.clone())
            .unwrap_or_else(|| self.inner.channel_id.clone());

        let request = NoticeRequest {
            channel_id: chat_channel_id,
            chat_type: STREAMING,
            extras,
            message: message.content.clone(),
            message_time: message.created_time.timestamp_millis(),
            message_user_id_hash: message.user_id.clone(),
            streaming_channel_id,
        };
        self.inner.http.set_notice_message(&request).await
    }

    /// 固定メッセージを解除する
    pub async fn delete_notice_message(&self) -> Result<(), ChzzkError> {
        let chat_channel_id = self.connected_chat_channel_id()?;
        self.inner.http.delete_notice_message(&chat_channel_id).await
    }

    /// メッセージを非表示にする
    pub async fn blind_message(&self, message: &ChatMessage) -> Result<(), ChzzkError> {
        let chat_channel_id = self.connected_chat_channel_id()?;
        let streaming_channel_id = message
            .extras
            .as_ref()
            .and_then(|e| e.streaming_channel_id.clone())
            .unwrap_or_else(|| self.inner.channel_id.clone());

        let request = BlindRequest {
            channel_id: chat_channel_id,
            chat_type: STREAMING,
            message: message.content.clone(),
            message_time: message.created_time.timestamp_millis(),
            message_user_id_hash: message.user_id.clone(),
            streaming_channel_id,
        };
        self.inner.http.blind_message(&request).await
    }
}

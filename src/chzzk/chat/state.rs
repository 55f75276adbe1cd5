use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use super::frame::AuthMode;
use crate::util::mask_secret;

/// チャット接続用の認証情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub user_id: Option<String>,
    pub mode: AuthMode,
}

impl Credential {
    pub fn new(access_token: String, user_id: Option<String>) -> Self {
        let mode = AuthMode::for_user(user_id.as_deref());
        Self {
            access_token,
            user_id,
            mode,
        }
    }
}

/// セッション状態
///
/// セッションIDと認証情報はセッションループだけが書き込み、
/// ゲートウェイ・ルーターは読み取りのみ行う。
pub struct SessionState {
    chat_channel_id: RwLock<Option<String>>,
    session_id: RwLock<Option<String>>,
    credential: RwLock<Option<Credential>>,
    connected: watch::Sender<bool>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        log::warn!("Session state lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        log::warn!("Session state lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl SessionState {
    pub fn new(chat_channel_id: Option<String>) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            chat_channel_id: RwLock::new(chat_channel_id),
            session_id: RwLock::new(None),
            credential: RwLock::new(None),
            connected,
        }
    }

    pub fn chat_channel_id(&self) -> Option<String> {
        read(&self.chat_channel_id).clone()
    }

    pub fn set_chat_channel_id(&self, chat_channel_id: String) {
        *write(&self.chat_channel_id) = Some(chat_channel_id);
    }

    pub fn session_id(&self) -> Option<String> {
        read(&self.session_id).clone()
    }

    /// サーバーから受け取ったセッションIDを記録
    pub fn set_session_id(&self, session_id: String) {
        let mut current = write(&self.session_id);
        if current.as_deref() != Some(session_id.as_str()) {
            log::info!("Chat session established: {}", session_id);
        }
        *current = Some(session_id);
    }

    pub fn credential(&self) -> Option<Credential> {
        read(&self.credential).clone()
    }

    pub fn set_credential(&self, credential: Credential) {
        log::debug!(
            "Chat access token set: {} (mode={:?})",
            mask_secret(&credential.access_token),
            credential.mode
        );
        *write(&self.credential) = Some(credential);
    }

    /// 認証情報を破棄（次回接続時に再取得させる）
    pub fn invalidate_credential(&self) {
        *write(&self.credential) = None;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(None)
    }
}

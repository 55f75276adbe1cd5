use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};

use super::{errors::ChzzkError, types::*};
use crate::config::{http_timeout, ChatConfig, USER_AGENT};
use crate::util::mask_secret;

/// ログイン用Cookie（NID_AUT / NID_SES）
#[derive(Debug, Clone)]
struct LoginCookie {
    authorization_key: String,
    session_key: String,
}

impl LoginCookie {
    fn header_value(&self) -> String {
        format!(
            "NID_SES={}; NID_AUT={}",
            self.session_key, self.authorization_key
        )
    }
}

/// Chzzk REST APIクライアント
///
/// チャット接続に必要な情報（チャットチャンネルID・アクセストークン・
/// ユーザーID）の取得と、固定メッセージ・ブラインド操作のみを扱う。
#[derive(Debug, Clone)]
pub struct ChzzkClient {
    client: Client,
    api_base_url: String,
    game_base_url: String,
    login: Arc<RwLock<Option<LoginCookie>>>,
}

impl ChzzkClient {
    /// 新しいクライアントを作成
    ///
    /// # Errors
    /// HTTPクライアントのビルドに失敗した場合にエラーを返す
    pub fn new(config: &ChatConfig) -> Result<Self, ChzzkError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(http_timeout())
            .build()?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            game_base_url: config.game_base_url.trim_end_matches('/').to_string(),
            login: Arc::new(RwLock::new(None)),
        })
    }

    /// ログイン情報を設定
    ///
    /// # 引数
    /// - `authorization_key`: Cookieの `NID_AUT`
    /// - `session_key`: Cookieの `NID_SES`
    pub fn login(&self, authorization_key: &str, session_key: &str) {
        log::info!(
            "Login with NID_AUT={} NID_SES={}",
            mask_secret(authorization_key),
            mask_secret(session_key)
        );
        match self.login.write() {
            Ok(mut guard) => {
                *guard = Some(LoginCookie {
                    authorization_key: authorization_key.to_string(),
                    session_key: session_key.to_string(),
                });
            }
            Err(e) => log::error!("Failed to acquire login lock: {}", e),
        }
    }

    /// ログイン済みかどうか
    pub fn has_login(&self) -> bool {
        self.login.read().map(|guard| guard.is_some()).unwrap_or(false)
    }

    fn cookie(&self) -> Option<String> {
        self.login
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(LoginCookie::header_value))
    }

    /// ログインCookieを付与する
    ///
    /// `required` がtrueで未ログインの場合は `LoginRequired` を返す
    fn with_login(
        &self,
        request: RequestBuilder,
        required: bool,
    ) -> Result<RequestBuilder, ChzzkError> {
        match self.cookie() {
            Some(cookie) => Ok(request.header(reqwest::header::COOKIE, cookie)),
            None if required => Err(ChzzkError::LoginRequired),
            None => Ok(request),
        }
    }

    /// レスポンスのステータスを確認してエンベロープを展開する
    async fn read_content<T: DeserializeOwned>(
        response: Response,
    ) -> Result<Option<T>, ChzzkError> {
        let status = response.status();
        match status {
            s if s.is_success() => {
                let data: Content<T> = response.json().await?;
                Ok(data.content)
            }
            StatusCode::NOT_FOUND => {
                let message = response
                    .json::<Content<serde_json::Value>>()
                    .await
                    .ok()
                    .and_then(|c| c.message)
                    .unwrap_or_else(|| "Not Found".to_string());
                log::warn!("Chzzk API not found: {}", message);
                Err(ChzzkError::NotFound(message))
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                let (code, message) = match serde_json::from_str::<Content<serde_json::Value>>(&text) {
                    Ok(c) => (c.code, c.message.unwrap_or_default()),
                    Err(_) => (status.as_u16() as i64, text),
                };
                log::error!(
                    "Unexpected API response - status: {}, code: {}, message: {}",
                    status,
                    code,
                    message
                );
                Err(ChzzkError::ApiError { code, message })
            }
        }
    }

    /// 配信のライブ状態を取得
    ///
    /// 配信していない場合は `None` が返ることがある
    pub async fn live_status(&self, channel_id: &str) -> Result<Option<LiveStatus>, ChzzkError> {
        log::info!("Fetching live status for channel: {}", channel_id);

        let url = format!(
            "{}/polling/v2/channels/{}/live-status",
            self.api_base_url, channel_id
        );
        let response = self.client.get(&url).send().await?;
        Self::read_content(response).await
    }

    /// ログイン中のユーザー情報を取得
    pub async fn user(&self) -> Result<User, ChzzkError> {
        let url = format!("{}/nng_main/v1/user/getUserStatus", self.game_base_url);
        let request = self.with_login(self.client.get(&url), true)?;
        let response = request.send().await?;

        Self::read_content(response)
            .await?
            .ok_or_else(|| ChzzkError::NotFound("user status is empty".to_string()))
    }

    /// チャット用アクセストークンを発行
    pub async fn chat_access_token(&self, chat_channel_id: &str) -> Result<AccessToken, ChzzkError> {
        log::info!("Issuing chat access token for chat channel: {}", chat_channel_id);

        let url = format!("{}/nng_main/v1/chats/access-token", self.game_base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("channelId", chat_channel_id), ("chatType", "STREAMING")]);
        let response = self.with_login(request, false)?.send().await?;

        let token: AccessToken = Self::read_content(response)
            .await?
            .ok_or_else(|| ChzzkError::NotFound("access token is empty".to_string()))?;
        log::debug!("Access token issued: {}", mask_secret(&token.access_token));
        Ok(token)
    }

    /// メッセージを固定する
    pub async fn set_notice_message(&self, notice: &NoticeRequest) -> Result<(), ChzzkError> {
        let url = format!("{}/nng_main/v1/chats/notices", self.game_base_url);
        let request = self.with_login(self.client.post(&url).json(notice), true)?;
        let response = request.send().await?;
        Self::read_content::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// 固定メッセージを解除する
    pub async fn delete_notice_message(&self, chat_channel_id: &str) -> Result<(), ChzzkError> {
        let url = format!("{}/nng_main/v1/chats/notices", self.game_base_url);
        let body = DeleteNoticeRequest {
            channel_id: chat_channel_id.to_string(),
            chat_type: "STREAMING",
        };
        let request = self.with_login(self.client.delete(&url).json(&body), true)?;
        let response = request.send().await?;
        Self::read_content::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// メッセージを非表示にする
    pub async fn blind_message(&self, blind: &BlindRequest) -> Result<(), ChzzkError> {
        let url = format!("{}/nng_main/v1/chats/blind-message", self.game_base_url);
        let request = self.with_login(self.client.post(&url).json(blind), true)?;
        let response = request.send().await?;
        Self::read_content::<serde_json::Value>(response).await?;
        Ok(())
    }
}

//! チャットサーバーとのWebSocket接続
//!
//! 1つの物理接続を表す。書き込み側は `Arc<Mutex<..>>` で共有し、
//! アプリケーションからの送信と受信ループが同じ接続上で競合しないようにする。

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::frame::{AuthMode, Frame};
use crate::chzzk::errors::ChzzkError;
use crate::config::ChatConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<Option<SplitSink<WsStream, Message>>>>;

/// 切断の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// 正常終了（1000）。再接続しない
    Normal,
    /// それ以外のクローズコード・ストリーム終端。再接続する
    Recoverable(Option<u16>),
}

impl CloseKind {
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(code) if code == u16::from(CloseCode::Normal) => CloseKind::Normal,
            other => CloseKind::Recoverable(other),
        }
    }
}

/// `receive_one` の結果
#[derive(Debug)]
pub enum Received {
    Frame(Frame),
    /// タイムアウトまでに何も届かなかった
    Timeout,
    /// JSONとして解釈できないメッセージ
    Invalid { raw: String, error: serde_json::Error },
    Closed(CloseKind),
    /// ソケットエラー（再接続対象）
    Error(ChzzkError),
}

/// 送信ハンドル（Clone可能）
#[derive(Clone)]
pub struct GatewaySender {
    sink: WsSink,
}

impl GatewaySender {
    /// フレームを送信
    pub async fn send(&self, frame: &Frame) -> Result<(), ChzzkError> {
        let json = frame.to_json()?;
        log::debug!("Sending frame: {}", json);
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ChzzkError::NotConnected)?;
        sink.send(Message::Text(json)).await?;
        Ok(())
    }

    /// 接続を閉じる（2回目以降は何もしない）
    pub async fn close(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                log::debug!("Error while closing chat socket: {}", e);
            }
        }
    }

    pub async fn is_open(&self) -> bool {
        self.sink.lock().await.is_some()
    }
}

/// 受信ハンドル（受信ループが専有する）
pub struct GatewayReceiver {
    stream: SplitStream<WsStream>,
}

impl GatewayReceiver {
    /// 1フレーム受信するか、タイムアウト・切断を通知する
    ///
    /// タイムアウト時のping送信は呼び出し側の責任
    pub async fn receive_one(&mut self, limit: Duration) -> Received {
        let deadline = Instant::now() + limit;
        loop {
            let next = match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Ok(next) => next,
                Err(_) => return Received::Timeout,
            };

            match next {
                None => return Received::Closed(CloseKind::Recoverable(None)),
                Some(Err(e)) => return Received::Error(e.into()),
                Some(Ok(Message::Text(text))) => return parse(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return parse(text),
                    Err(e) => log::warn!("Ignoring non UTF-8 binary message: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    log::debug!("Received close frame: {:?}", code);
                    return Received::Closed(CloseKind::from_code(code));
                }
                // WebSocketレベルのping/pongはtungsteniteが処理する
                Some(Ok(_)) => continue,
            }
        }
    }
}

fn parse(text: String) -> Received {
    log::debug!("Received frame: {}", text);
    match Frame::parse(&text) {
        Ok(frame) => Received::Frame(frame),
        Err(error) => Received::Invalid { raw: text, error },
    }
}

/// 確立済みの接続
pub struct Connection {
    pub sender: GatewaySender,
    pub receiver: GatewayReceiver,
    /// 再開するセッションID（新規セッションならNone）
    pub session_id: Option<String>,
}

impl Connection {
    /// 接続フレームを送信
    pub async fn send_handshake(
        &self,
        access_token: &str,
        chat_channel_id: &str,
        mode: AuthMode,
        user_id: Option<&str>,
    ) -> Result<(), ChzzkError> {
        self.sender
            .send(&Frame::handshake(access_token, chat_channel_id, mode, user_id))
            .await
    }
}

pub struct Gateway;

impl Gateway {
    /// チャットチャンネルIDから決まるシャードに接続
    pub async fn open(
        config: &ChatConfig,
        chat_channel_id: &str,
        session_id: Option<String>,
    ) -> Result<Connection, ChzzkError> {
        let url = config.endpoint_for(chat_channel_id);
        log::info!(
            "Opening chat socket: {} (resume={})",
            url,
            session_id.is_some()
        );
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (sink, stream) = ws_stream.split();

        Ok(Connection {
            sender: GatewaySender {
                sink: Arc::new(Mutex::new(Some(sink))),
            },
            receiver: GatewayReceiver { stream },
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chzzk::chat::test_server::FakeServer;

    #[test]
    fn test_close_kind_from_code() {
        assert_eq!(CloseKind::from_code(Some(1000)), CloseKind::Normal);
        assert_eq!(CloseKind::from_code(Some(1006)), CloseKind::Recoverable(Some(1006)));
        assert_eq!(CloseKind::from_code(None), CloseKind::Recoverable(None));
    }

    #[tokio::test]
    async fn test_send_and_receive_frames() {
        let server = FakeServer::start().await;
        let config = ChatConfig::default().with_endpoint(server.url());
        let mut conn = Gateway::open(&config, "N1abc", None).await.unwrap();
        let mut peer = server.accept().await;

        conn.send_handshake("token", "N1abc", AuthMode::Read, None)
            .await
            .unwrap();
        let sent = peer.recv_frame().await.unwrap();
        assert_eq!(sent.cmd, 100);

        peer.send_json(r#"{"cmd":10100,"retCode":0,"bdy":{"sid":"abc123"}}"#)
            .await;
        match conn.receiver.receive_one(Duration::from_secs(1)).await {
            Received::Frame(frame) => assert_eq!(frame.body.unwrap()["sid"], "abc123"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let server = FakeServer::start().await;
        let config = ChatConfig::default().with_endpoint(server.url());
        let mut conn = Gateway::open(&config, "N1abc", None).await.unwrap();
        let _peer = server.accept().await;

        let received = conn.receiver.receive_one(Duration::from_millis(30)).await;
        assert!(matches!(received, Received::Timeout));
    }

    #[tokio::test]
    async fn test_invalid_json_is_reported() {
        let server = FakeServer::start().await;
        let config = ChatConfig::default().with_endpoint(server.url());
        let mut conn = Gateway::open(&config, "N1abc", None).await.unwrap();
        let mut peer = server.accept().await;

        peer.send_json("not json").await;
        match conn.receiver.receive_one(Duration::from_secs(1)).await {
            Received::Invalid { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_codes() {
        let server = FakeServer::start().await;
        let config = ChatConfig::default().with_endpoint(server.url());

        let mut conn = Gateway::open(&config, "N1abc", None).await.unwrap();
        let peer = server.accept().await;
        peer.close_with(1000).await;
        assert!(matches!(
            conn.receiver.receive_one(Duration::from_secs(1)).await,
            Received::Closed(CloseKind::Normal)
        ));

        let mut conn = Gateway::open(&config, "N1abc", None).await.unwrap();
        let peer = server.accept().await;
        peer.close_with(4000).await;
        assert!(matches!(
            conn.receiver.receive_one(Duration::from_secs(1)).await,
            Received::Closed(CloseKind::Recoverable(Some(4000)))
        ));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let server = FakeServer::start().await;
        let config = ChatConfig::default().with_endpoint(server.url());
        let conn = Gateway::open(&config, "N1abc", None).await.unwrap();
        let _peer = server.accept().await;

        conn.sender.close().await;
        assert!(!conn.sender.is_open().await);
        let result = conn.sender.send(&Frame::ping()).await;
        assert!(matches!(result, Err(ChzzkError::NotConnected)));
    }
}

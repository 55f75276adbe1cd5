//! テスト用のチャットサーバー
//!
//! 接続を受け付けるたびに `FakePeer` を渡し、テスト側でフレームの送受信を操作する。

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use super::frame::Frame;

const WAIT: Duration = Duration::from_secs(5);

pub struct FakeServer {
    addr: SocketAddr,
    peers: Mutex<mpsc::UnboundedReceiver<FakePeer>>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                match accept_async(stream).await {
                    Ok(ws) => {
                        if tx.send(FakePeer { ws }).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("fake server handshake failed: {}", e),
                }
            }
        });

        Self {
            addr,
            peers: Mutex::new(rx),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/chat", self.addr)
    }

    /// 次の接続を待つ
    pub async fn accept(&self) -> FakePeer {
        let mut peers = self.peers.lock().await;
        tokio::time::timeout(WAIT, peers.recv())
            .await
            .expect("no connection arrived")
            .expect("acceptor stopped")
    }

    /// 指定時間内に新しい接続が来ないことを確認する
    pub async fn no_connection_within(&self, wait: Duration) -> bool {
        let mut peers = self.peers.lock().await;
        tokio::time::timeout(wait, peers.recv()).await.is_err()
    }
}

pub struct FakePeer {
    ws: WebSocketStream<TcpStream>,
}

impl FakePeer {
    /// 次のテキストフレームを受け取る（切断時はNone）
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        self.recv_frame_within(WAIT).await
    }

    /// キープアライブのpingを読み飛ばして次のフレームを受け取る
    pub async fn recv_non_ping(&mut self) -> Option<Frame> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.cmd != 0 {
                return Some(frame);
            }
        }
    }

    pub async fn recv_frame_within(&mut self, wait: Duration) -> Option<Frame> {
        self.recv_value_within(wait)
            .await
            .map(|value| serde_json::from_value(value).unwrap())
    }

    pub async fn recv_value_within(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let next = tokio::time::timeout(wait, self.ws.next()).await.ok()??;
            match next {
                Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    pub async fn send_json(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    pub async fn send_value(&mut self, value: Value) {
        self.send_json(&value.to_string()).await;
    }

    /// クローズコードを指定して切断
    pub async fn close_with(mut self, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let _ = self.ws.close(Some(frame)).await;
        tokio::spawn(async move { while self.ws.next().await.is_some() {} });
    }

    /// クローズハンドシェイクなしでTCP接続を切る
    pub fn drop_connection(self) {
        drop(self.ws);
    }
}

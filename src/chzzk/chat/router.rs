//! 受信フレームをイベントに変換するルーター
//!
//! セッションIDの記録やpong応答などプロトコル上の処理もここで行う。
//! 1件のデコード失敗は `client_error` として通知し、受信ループは止めない。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::cmd::{chat_type, ChatCmd, Command};
use super::dispatcher::Dispatcher;
use super::event::ChatEvent;
use super::frame::Frame;
use super::state::SessionState;
use super::types::{
    Blind, ChatMessage, ConnectedInfo, DonationMessage, NoticeMessage, RecentChat,
    SubscriptionMessage, SystemMessage,
};
use crate::chzzk::errors::ChzzkError;

/// メッセージ種別コードごとのデコーダー
pub type RecordDecoder = fn(&Value) -> Result<ChatEvent, serde_json::Error>;

fn default_decoders() -> HashMap<i64, RecordDecoder> {
    let mut decoders: HashMap<i64, RecordDecoder> = HashMap::new();
    decoders.insert(chat_type::TEXT, |v| {
        ChatMessage::deserialize(v).map(ChatEvent::Chat)
    });
    decoders.insert(chat_type::DONATION, |v| {
        DonationMessage::deserialize(v).map(ChatEvent::Donation)
    });
    decoders.insert(chat_type::SUBSCRIPTION, |v| {
        SubscriptionMessage::deserialize(v).map(ChatEvent::Subscription)
    });
    decoders.insert(chat_type::SYSTEM_MESSAGE, |v| {
        SystemMessage::deserialize(v).map(ChatEvent::SystemMessage)
    });
    decoders
}

/// レコードのメッセージ種別コード
fn record_type(record: &Value) -> Option<i64> {
    record
        .get("messageTypeCode")
        .or_else(|| record.get("msgTypeCode"))
        .and_then(Value::as_i64)
}

fn is_empty_body(body: &Option<Value>) -> bool {
    match body {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(list)) => list.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

pub struct ConnectionRouter {
    state: Arc<SessionState>,
    dispatcher: Dispatcher,
    decoders: RwLock<HashMap<i64, RecordDecoder>>,
}

impl ConnectionRouter {
    pub fn new(state: Arc<SessionState>, dispatcher: Dispatcher) -> Self {
        Self {
            state,
            dispatcher,
            decoders: RwLock::new(default_decoders()),
        }
    }

    /// メッセージ種別コードのデコーダーを登録（既存のものは置き換える）
    pub fn register_decoder(&self, type_code: i64, decoder: RecordDecoder) -> Option<RecordDecoder> {
        match self.decoders.write() {
            Ok(mut decoders) => decoders.insert(type_code, decoder),
            Err(poisoned) => poisoned.into_inner().insert(type_code, decoder),
        }
    }

    fn decoder_for(&self, type_code: i64) -> Option<RecordDecoder> {
        match self.decoders.read() {
            Ok(decoders) => decoders.get(&type_code).copied(),
            Err(poisoned) => poisoned.into_inner().get(&type_code).copied(),
        }
    }

    /// 1フレームを処理する
    ///
    /// 同じ接続に返すべき応答（pong）があればそれを返す。
    /// 接続応答でサーバーがセッションを拒否した場合のみErrを返す。
    pub fn route(&self, frame: Frame) -> Result<Option<Frame>, ChzzkError> {
        let command = frame.command();
        let body = frame.body;

        match command {
            Command::Known(ChatCmd::Ping) => {
                log::debug!("Received ping, replying with pong");
                return Ok(Some(Frame::pong()));
            }
            Command::Known(ChatCmd::Pong) => log::debug!("Received pong"),
            Command::Known(ChatCmd::Connected) => {
                self.on_connected(frame.ret_code, frame.ret_msg, body)?
            }
            Command::Known(cmd @ (ChatCmd::Chat | ChatCmd::SpecialChat)) => {
                self.on_chat_batch(cmd, body)
            }
            Command::Known(ChatCmd::RecentChat) => {
                if let Some(recent) = self.decode::<RecentChat>(ChatCmd::RecentChat, body) {
                    self.dispatcher.dispatch(ChatEvent::RecentChat(recent));
                }
            }
            Command::Known(ChatCmd::Notice) => self.on_notice(body),
            Command::Known(ChatCmd::Blind) => {
                if let Some(blind) = self.decode::<Blind>(ChatCmd::Blind, body) {
                    self.dispatcher.dispatch(ChatEvent::Blind(blind));
                }
            }
            Command::Known(
                cmd @ (ChatCmd::Kick | ChatCmd::Block | ChatCmd::Penalty | ChatCmd::Event),
            ) => {
                self.dispatcher.dispatch(ChatEvent::Command { cmd, body });
            }
            Command::Known(cmd @ (ChatCmd::Connect | ChatCmd::RequestRecentChat | ChatCmd::SendChat)) => {
                log::debug!("Ignoring client command echoed by server: {}", cmd);
            }
            Command::Unknown(cmd) => {
                log::debug!("Unknown command {}, forwarding raw body", cmd);
                self.dispatcher.dispatch(ChatEvent::Unknown { cmd, body });
            }
        }
        Ok(None)
    }

    fn on_connected(
        &self,
        ret_code: Option<i64>,
        ret_msg: Option<String>,
        body: Option<Value>,
    ) -> Result<(), ChzzkError> {
        if let Some(code) = ret_code.filter(|code| *code != 0) {
            let message = ret_msg.unwrap_or_default();
            log::error!("Chat server rejected the session: {} {}", code, message);
            self.dispatcher.dispatch(ChatEvent::client_error(
                ChzzkError::HandshakeRejected {
                    code,
                    message: message.clone(),
                },
                body,
            ));
            return Err(ChzzkError::HandshakeRejected { code, message });
        }

        if let Some(info) = self.decode::<ConnectedInfo>(ChatCmd::Connected, body) {
            // connectを通知する前にセッションIDを記録する
            self.state.set_session_id(info.session_id.clone());
            self.state.set_connected(true);
            self.dispatcher.dispatch(ChatEvent::Connect(info));
        }
        Ok(())
    }

    fn on_chat_batch(&self, cmd: ChatCmd, body: Option<Value>) {
        let records = match body {
            None | Some(Value::Null) => return,
            Some(Value::Array(records)) => records,
            Some(other) => {
                self.report(
                    ChzzkError::decode(cmd.name(), "expected a list of messages"),
                    Some(other),
                );
                return;
            }
        };

        for record in records {
            let Some(type_code) = record_type(&record) else {
                self.report(
                    ChzzkError::decode(cmd.name(), "missing message type code"),
                    Some(record),
                );
                continue;
            };
            let Some(decoder) = self.decoder_for(type_code) else {
                log::debug!("No decoder for message type {}, skipping", type_code);
                continue;
            };
            match decoder(&record) {
                Ok(event) => self.dispatcher.dispatch(event),
                Err(e) => self.report(ChzzkError::decode(cmd.name(), e), Some(record)),
            }
        }
    }

    fn on_notice(&self, body: Option<Value>) {
        if is_empty_body(&body) {
            self.dispatcher.dispatch(ChatEvent::Unpin);
            return;
        }
        if let Some(notice) = self.decode::<NoticeMessage>(ChatCmd::Notice, body) {
            self.dispatcher.dispatch(ChatEvent::Notice(notice.clone()));
            self.dispatcher.dispatch(ChatEvent::Pin(notice));
        }
    }

    fn decode<T: DeserializeOwned>(&self, cmd: ChatCmd, body: Option<Value>) -> Option<T> {
        let body = body.unwrap_or(Value::Null);
        match T::deserialize(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(ChzzkError::decode(cmd.name(), e), Some(body));
                None
            }
        }
    }

    fn report(&self, error: ChzzkError, payload: Option<Value>) {
        log::warn!("{}", error);
        self.dispatcher.dispatch(ChatEvent::client_error(error, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chzzk::chat::event::EventKind;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn router() -> (ConnectionRouter, Arc<SessionState>, UnboundedReceiver<ChatEvent>) {
        let state = Arc::new(SessionState::default());
        let dispatcher = Dispatcher::new();
        let events = dispatcher.events();
        (ConnectionRouter::new(state.clone(), dispatcher), state, events)
    }

    fn frame(value: Value) -> Frame {
        serde_json::from_value(value).unwrap()
    }

    fn drain(events: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn record(type_code: i64, msg: &str) -> Value {
        json!({
            "uid": "user-hash",
            "profile": "{\"nickname\":\"viewer\"}",
            "msg": msg,
            "msgTypeCode": type_code,
            "extras": "{}",
            "ctime": 1703145600000i64,
            "msgTime": 1703145600000i64
        })
    }

    #[tokio::test]
    async fn test_ping_replies_pong_without_events() {
        let (router, _, mut events) = router();
        let reply = router.route(Frame::ping()).unwrap();
        assert_eq!(reply, Some(Frame::pong()));
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_connected_captures_session_before_connect_event() {
        let (router, state, mut events) = router();
        let reply = router
            .route(frame(json!({"cmd": 10100, "retCode": 0, "bdy": {"sid": "abc123", "auth": "READ"}})))
            .unwrap();
        assert!(reply.is_none());
        assert_eq!(state.session_id().as_deref(), Some("abc123"));
        assert!(state.is_connected());

        let seen = drain(&mut events);
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            ChatEvent::Connect(info) => assert_eq!(info.session_id, "abc123"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connected_with_error_code_is_rejected() {
        let (router, state, mut events) = router();
        let result = router.route(frame(json!({"cmd": 10100, "retCode": 42, "retMsg": "denied", "bdy": null})));
        assert!(matches!(result, Err(ChzzkError::HandshakeRejected { code: 42, .. })));
        assert_eq!(state.session_id(), None);
        let seen = drain(&mut events);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].kind(), EventKind::ClientError);
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_order() {
        let (router, _, mut events) = router();
        let donation = json!({
            "uid": "donor",
            "profile": "{}",
            "msg": "thanks",
            "msgTypeCode": 10,
            "extras": "{\"payAmount\":1000,\"donationType\":\"CHAT\"}",
            "ctime": 1703145600000i64,
            "msgTime": 1703145600000i64
        });
        let system = json!({
            "uid": "SYSTEM_MESSAGE",
            "profile": "{}",
            "msg": "",
            "msgTypeCode": 30,
            "extras": "{\"description\":\"notice\"}",
            "ctime": 1703145600000i64,
            "msgTime": 1703145600000i64
        });
        router
            .route(frame(json!({
                "cmd": 93102,
                "bdy": [record(1, "first"), donation, system, record(1, "last")]
            })))
            .unwrap();

        let kinds: Vec<EventKind> = drain(&mut events).iter().map(ChatEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Chat,
                EventKind::Donation,
                EventKind::SystemMessage,
                EventKind::Chat
            ]
        );
    }

    #[tokio::test]
    async fn test_subscription_record_in_batch() {
        let (router, _, mut events) = router();
        let subscription = json!({
            "uid": "subscriber",
            "profile": "{\"nickname\":\"sub\"}",
            "msg": "",
            "msgTypeCode": 11,
            "extras": "{\"month\":3,\"tierName\":\"Tier 1\"}",
            "ctime": 1703145600000i64,
            "msgTime": 1703145600000i64
        });
        router
            .route(frame(json!({
                "cmd": 93102,
                "bdy": [record(1, "before"), subscription, record(1, "after")]
            })))
            .unwrap();

        let seen = drain(&mut events);
        let kinds: Vec<EventKind> = seen.iter().map(ChatEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Chat, EventKind::Subscription, EventKind::Chat]
        );
        match &seen[1] {
            ChatEvent::Subscription(msg) => {
                assert_eq!(msg.user_id, "subscriber");
                let extras = msg.extras.as_ref().unwrap();
                assert_eq!(extras.month, 3);
                assert_eq!(extras.tier_name.as_deref(), Some("Tier 1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_produces_nothing() {
        let (router, _, mut events) = router();
        router.route(frame(json!({"cmd": 93101, "bdy": []}))).unwrap();
        router.route(frame(json!({"cmd": 93101}))).unwrap();
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_bad_record_reported_and_others_delivered() {
        let (router, _, mut events) = router();
        let broken = json!({"uid": "x", "msgTypeCode": 1, "ctime": "yesterday", "msgTime": 0});
        router
            .route(frame(json!({"cmd": 93101, "bdy": [broken.clone(), record(1, "ok")]})))
            .unwrap();

        let seen = drain(&mut events);
        assert_eq!(seen.len(), 2);
        let err = seen[0].as_client_error().unwrap();
        assert_eq!(err.payload.as_ref(), Some(&broken));
        assert!(matches!(*err.error, ChzzkError::DecodeError { .. }));
        assert_eq!(seen[1].as_chat().unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_notice_empty_body_unpins() {
        let (router, _, mut events) = router();
        router.route(frame(json!({"cmd": 94010, "bdy": {}}))).unwrap();
        let kinds: Vec<EventKind> = drain(&mut events).iter().map(ChatEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::Unpin]);
    }

    #[tokio::test]
    async fn test_notice_body_emits_notice_and_pin() {
        let (router, _, mut events) = router();
        router
            .route(frame(json!({"cmd": 94010, "bdy": record(1, "pinned")})))
            .unwrap();

        let seen = drain(&mut events);
        let kinds: Vec<EventKind> = seen.iter().map(ChatEvent::kind).collect();
        assert_eq!(kinds, vec![EventKind::Notice, EventKind::Pin]);
        assert_eq!(seen[0].as_notice().unwrap().content, "pinned");
        assert_eq!(seen[1].as_notice().unwrap().content, "pinned");
    }

    #[tokio::test]
    async fn test_recent_chat_and_blind() {
        let (router, _, mut events) = router();
        router
            .route(frame(json!({"cmd": 15101, "bdy": {"messageList": [record(1, "a")], "userCount": 3}})))
            .unwrap();
        router
            .route(frame(json!({"cmd": 94008, "bdy": {
                "messageTime": 1703145600000i64,
                "blindType": "CBOTBLIND",
                "userId": "user-hash"
            }})))
            .unwrap();

        let seen = drain(&mut events);
        assert_eq!(seen[0].as_recent_chat().unwrap().message_list.len(), 1);
        assert_eq!(seen[1].kind(), EventKind::Blind);
    }

    #[tokio::test]
    async fn test_unknown_command_passes_through() {
        let (router, _, mut events) = router();
        router
            .route(frame(json!({"cmd": 99999, "bdy": {"x": 1}})))
            .unwrap();
        router.route(frame(json!({"cmd": 94005, "bdy": null}))).unwrap();

        let seen = drain(&mut events);
        match &seen[0] {
            ChatEvent::Unknown { cmd, body } => {
                assert_eq!(*cmd, 99999);
                assert_eq!(body.as_ref().unwrap()["x"], 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(seen[1].kind(), EventKind::Kick);
    }

    #[tokio::test]
    async fn test_registered_decoder_handles_new_type() {
        let (router, _, mut events) = router();
        // 画像チャットはデフォルトでは配信しない
        router
            .route(frame(json!({"cmd": 93101, "bdy": [record(chat_type::IMAGE, "img")]})))
            .unwrap();
        assert!(drain(&mut events).is_empty());

        router.register_decoder(chat_type::IMAGE, |v| {
            ChatMessage::deserialize(v).map(ChatEvent::Chat)
        });
        router
            .route(frame(json!({"cmd": 93101, "bdy": [record(chat_type::IMAGE, "img")]})))
            .unwrap();
        assert_eq!(drain(&mut events)[0].as_chat().unwrap().content, "img");
    }
}

//! イベントディスパッチャー
//!
//! 1回限りの条件付き待機（waiter）と、名前付きイベントの永続購読（subscriber）の
//! 2つのレジストリを持つ。

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};

use super::event::{ChatEvent, ClientError, EventKind};
use crate::chzzk::errors::ChzzkError;

type Predicate = Box<dyn Fn(&ChatEvent) -> Result<bool, String> + Send>;

/// 永続購読のコールバック
pub type EventCallback = Arc<dyn Fn(ChatEvent) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// `on` の戻り値（購読解除に使う）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Waiter {
    id: u64,
    predicate: Predicate,
    tx: oneshot::Sender<Result<ChatEvent, ChzzkError>>,
}

impl Waiter {
    /// 述語を評価（panicもエラーとして扱う）
    fn check(&self, event: &ChatEvent) -> Result<bool, String> {
        std::panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(event)))
            .unwrap_or_else(|panic| Err(panic_message(panic.as_ref())))
    }
}

#[derive(Default)]
struct Registry {
    waiters: Mutex<HashMap<EventKind, Vec<Waiter>>>,
    subscribers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, EventCallback)>>>,
    streams: Mutex<Vec<mpsc::UnboundedSender<ChatEvent>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// イベントを待機者・購読者に配信する
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Registry>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("Dispatcher registry lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 永続購読を登録
    ///
    /// コールバックはイベントごとに独立したタスクとして実行される。
    /// 失敗（Errまたはpanic）は `client_error` として通知され、登録は維持される。
    pub fn on<F, Fut, E>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(ChatEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + 'static,
    {
        let callback: EventCallback = Arc::new(move |event| {
            let fut = callback(event);
            async move { fut.await.map_err(|e| e.to_string()) }.boxed()
        });
        let id = SubscriptionId(self.next_id());
        lock(&self.inner.subscribers)
            .entry(kind)
            .or_default()
            .push((id, callback));
        log::debug!("Subscribed to {} ({:?})", kind, id);
        id
    }

    /// 購読を解除（解除できた場合true）
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.inner.subscribers);
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// 全イベントを配信順に受け取るストリーム
    pub fn events(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut streams = lock(&self.inner.streams);
        if !self.is_closed() {
            streams.push(tx);
        }
        rx
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.subscribers).get(&kind).map_or(0, Vec::len)
    }

    pub fn waiter_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.waiters).get(&kind).map_or(0, Vec::len)
    }

    fn register(
        &self,
        kind: EventKind,
        predicate: Predicate,
    ) -> Result<(u64, oneshot::Receiver<Result<ChatEvent, ChzzkError>>), ChzzkError> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id();
        let mut waiters = lock(&self.inner.waiters);
        // close()はフラグを立ててからこのロックで待機者を回収する
        if self.is_closed() {
            return Err(ChzzkError::Closed);
        }
        waiters
            .entry(kind)
            .or_default()
            .push(Waiter { id, predicate, tx });
        Ok((id, rx))
    }

    fn remove_waiter(&self, kind: EventKind, id: u64) {
        if let Some(list) = lock(&self.inner.waiters).get_mut(&kind) {
            list.retain(|w| w.id != id);
        }
    }

    /// 条件を満たす最初のイベントを待つ
    ///
    /// 待機者は呼び出した時点で登録される。戻り値のFutureをawaitする前に
    /// 届いたイベントも取りこぼさない。
    pub fn wait_for<P>(
        &self,
        kind: EventKind,
        predicate: P,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ChatEvent, ChzzkError>> + Send + 'static
    where
        P: Fn(&ChatEvent) -> bool + Send + 'static,
    {
        self.wait_for_checked(kind, move |event| Ok::<_, String>(predicate(event)), timeout)
    }

    /// 失敗し得る述語で待つ
    ///
    /// 述語がErrを返した場合、待機はそのエラー（`PredicateError`）で完了する。
    pub fn wait_for_checked<P, E>(
        &self,
        kind: EventKind,
        predicate: P,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<ChatEvent, ChzzkError>> + Send + 'static
    where
        P: Fn(&ChatEvent) -> Result<bool, E> + Send + 'static,
        E: Display + 'static,
    {
        let registration = self.register(
            kind,
            Box::new(move |event| predicate(event).map_err(|e| e.to_string())),
        );
        let dispatcher = self.clone();

        async move {
            let (id, rx) = registration?;
            let received = match timeout {
                Some(limit) => match tokio::time::timeout(limit, rx).await {
                    Ok(received) => received,
                    Err(_) => {
                        dispatcher.remove_waiter(kind, id);
                        return Err(ChzzkError::Timeout);
                    }
                },
                None => rx.await,
            };
            // 送信側が破棄された場合はクローズ扱い
            received.unwrap_or(Err(ChzzkError::Closed))
        }
    }

    /// イベントを配信
    ///
    /// 待機者は登録順に評価され、条件を満たしたものは同じ走査の中で完了・削除される。
    /// 購読コールバックはそれぞれ別タスクで実行する。
    pub fn dispatch(&self, event: ChatEvent) {
        let kind = event.kind();
        log::debug!("Dispatching event {}", kind);

        let mut failures = Vec::new();
        {
            let mut waiters = lock(&self.inner.waiters);
            if let Some(list) = waiters.get_mut(&kind) {
                let pending = std::mem::take(list);
                for waiter in pending {
                    if waiter.tx.is_closed() {
                        continue;
                    }
                    match waiter.check(&event) {
                        Ok(true) => {
                            let _ = waiter.tx.send(Ok(event.clone()));
                        }
                        Ok(false) => list.push(waiter),
                        Err(message) => {
                            log::warn!("wait_for predicate for {} failed: {}", kind, message);
                            failures.push(message.clone());
                            let _ = waiter.tx.send(Err(ChzzkError::PredicateError(message)));
                        }
                    }
                }
            }
        }

        lock(&self.inner.streams).retain(|tx| tx.send(event.clone()).is_ok());

        let callbacks: Vec<EventCallback> = lock(&self.inner.subscribers)
            .get(&kind)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            let dispatcher = self.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(callback(event)).catch_unwind().await;
                let message = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(message)) => message,
                    Err(panic) => panic_message(panic.as_ref()),
                };
                dispatcher.report_failure(kind, ChzzkError::CallbackError(message));
            });
        }

        for message in failures {
            self.report_failure(kind, ChzzkError::PredicateError(message));
        }
    }

    /// アプリケーション側の失敗を `client_error` として通知
    ///
    /// `client_error` 自身の購読者の失敗はログのみ（再通知しない）
    fn report_failure(&self, source: EventKind, error: ChzzkError) {
        if source == EventKind::ClientError {
            log::error!("Ignoring exception in client_error handler: {}", error);
            return;
        }
        log::error!("Ignoring exception in {} handler: {}", source, error);
        self.dispatch(ChatEvent::ClientError(
            ClientError::new(error).with_source(source),
        ));
    }

    /// 全待機者を `Closed` で失敗させ、購読を破棄する
    ///
    /// 以降の `wait_for` は即座に `Closed` を返す
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let drained: Vec<Waiter> = lock(&self.inner.waiters)
            .drain()
            .flat_map(|(_, list)| list)
            .collect();
        for waiter in drained {
            let _ = waiter.tx.send(Err(ChzzkError::Closed));
        }
        lock(&self.inner.subscribers).clear();
        lock(&self.inner.streams).clear();
    }
}

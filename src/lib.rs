//! Chzzk（NAVERのライブ配信サービス）のチャットクライアント
//!
//! ```no_run
//! use chzzk_chat::{ChatClient, ChatConfig, EventKind};
//!
//! # async fn example() -> Result<(), chzzk_chat::ChzzkError> {
//! let client = ChatClient::new("channel-id", ChatConfig::default())?;
//! client.on(EventKind::Chat, |event| async move {
//!     if let Some(chat) = event.as_chat() {
//!         println!("{}", chat.content);
//!     }
//!     Ok::<(), String>(())
//! });
//! client.run().await
//! # }
//! ```

pub mod chzzk;
pub mod config;
pub mod util; // doctestのためpubにする

pub use chzzk::chat::{ChatClient, ChatEvent, EventKind};
pub use chzzk::{ChzzkClient, ChzzkError};
pub use config::ChatConfig;

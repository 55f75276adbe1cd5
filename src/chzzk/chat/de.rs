//! チャットサーバーのペイロード用のデシリアライズ補助
//!
//! 同じ項目でも数値・文字列・JSON文字列のどれで届くかが揃っていないため、
//! 寛容に受け付ける。

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// 文字列・数値のどちらでも `String` として受け取る
pub fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// 数値または数値文字列を `u32` として受け取る（解釈できなければNone）
pub fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

fn value_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())),
        _ => None,
    }
}

/// エポックミリ秒またはRFC 3339文字列の必須タイムスタンプ
pub fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_datetime(&value)
        .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", value)))
}

/// 省略可能なタイムスタンプ
pub fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value_to_datetime(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", value))),
    }
}

/// JSON文字列として埋め込まれたオブジェクトを展開する
///
/// null・空文字列・`"{}"` はNoneとして扱う。オブジェクトが直接届いた場合もそのまま受け付ける。
pub fn embedded_json<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "{}" || trimmed == "null" {
                return Ok(None);
            }
            serde_json::from_str(trimmed).map(Some).map_err(D::Error::custom)
        }
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value).map(Some).map_err(D::Error::custom),
    }
}

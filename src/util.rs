/// アクセストークンやCookieをマスキングしてログ出力用の文字列を生成
///
/// 最初の4文字と最後の4文字のみを表示し、中間を***でマスキング
///
/// # Examples
/// ```
/// use chzzk_chat::util::mask_secret;
///
/// let masked = mask_secret("a1b2c3d4e5f6g7h8");
/// assert_eq!(masked, "a1b2***g7h8");
/// ```
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    if len <= 8 {
        // 短い値は全体をマスク
        return "***".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[len - 4..].iter().collect();
    format!("{}***{}", prefix, suffix)
}

/// 現在時刻をUNIXエポックからのミリ秒で返す
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

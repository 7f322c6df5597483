use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::warn;

/// An incoming chat text message.
#[derive(Debug, Clone)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_type: String,
    pub user_id: i64,
    pub username: String,
    pub text: String,
}

/// An inline-button press. `data` carries the `<action>:<payload>` string.
#[derive(Debug, Clone)]
pub struct TgCallback {
    pub callback_id: String,
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub username: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub enum TgUpdate {
    Message(TgMessage),
    Callback(TgCallback),
}

/// Result of a direct message to a user, modelled explicitly so callers
/// branch instead of catching exceptions.
#[derive(Debug)]
pub enum SendOutcome {
    Delivered,
    /// The user has not started the bot (403).
    UserUnreachable,
    Transient(String),
}

/// Inline keyboard: rows of (label, callback_data) buttons.
#[derive(Debug, Clone, Default)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<(String, String)>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<(String, String)>) -> Self {
        self.rows.push(buttons);
        self
    }

    fn to_json(&self) -> Value {
        let rows: Vec<Value> = self
            .rows
            .iter()
            .map(|row| {
                Value::Array(
                    row.iter()
                        .map(|(label, data)| json!({"text": label, "callback_data": data}))
                        .collect(),
                )
            })
            .collect();
        json!({ "inline_keyboard": rows })
    }
}

pub struct Telegram {
    token: String,
    client: Client,
    last_update_id: AtomicI64,
}

impl Telegram {
    /// Client with the configured connection pool, timeouts and optional
    /// proxy. The read timeout caps each request end-to-end.
    pub fn new(
        token: impl Into<String>,
        pool_size: usize,
        read_timeout: Duration,
        connect_timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .pool_max_idle_per_host(pool_size)
            .timeout(read_timeout)
            .connect_timeout(connect_timeout);
        if let Some(url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(url).context("invalid proxy url")?);
        }
        Ok(Self {
            token: token.into(),
            client: builder.build().context("failed to build transport client")?,
            last_update_id: AtomicI64::new(0),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{}", self.token, method)
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value> {
        let resp: Value = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{method} request"))?
            .json()
            .await
            .with_context(|| format!("{method} parse"))?;
        if resp["ok"] != true {
            return Err(anyhow!(
                "{method} failed: {} (code {})",
                resp["description"].as_str().unwrap_or("unknown"),
                resp["error_code"].as_i64().unwrap_or(0)
            ));
        }
        Ok(resp)
    }

    /// Fetch bot info; used as a connectivity check at boot.
    pub async fn get_me(&self) -> Result<String> {
        let resp = self.call("getMe", &json!({})).await?;
        Ok(resp["result"]["username"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// Long-poll for text messages and inline-button callbacks.
    pub async fn get_updates(&self) -> Result<Vec<TgUpdate>> {
        let offset = self.last_update_id.load(Ordering::Relaxed) + 1;
        let url = format!(
            "{}?timeout=25&offset={}&allowed_updates=[\"message\",\"callback_query\"]",
            self.api_url("getUpdates"),
            offset
        );

        let resp: Value = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(35))
            .send()
            .await
            .context("getUpdates request")?
            .json()
            .await
            .context("getUpdates parse")?;

        let updates = match resp["result"].as_array() {
            Some(a) => a,
            None => return Ok(vec![]),
        };

        let mut out = Vec::new();

        for update in updates {
            let update_id = update["update_id"].as_i64().unwrap_or(0);
            if update_id > self.last_update_id.load(Ordering::Relaxed) {
                self.last_update_id.store(update_id, Ordering::Relaxed);
            }
            if let Some(parsed) = parse_update(update) {
                out.push(parsed);
            }
        }

        Ok(out)
    }

    /// Send an HTML message; returns the new message id.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<i64> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(id) = reply_to {
            body["reply_to_message_id"] = json!(id);
        }
        if let Some(kb) = keyboard {
            body["reply_markup"] = kb.to_json();
        }
        let resp = self.call("sendMessage", &body).await?;
        Ok(resp["result"]["message_id"].as_i64().unwrap_or(0))
    }

    /// Rewrite an existing message. Passing no keyboard drops any inline
    /// buttons the message carried.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<()> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(kb) = keyboard {
            body["reply_markup"] = kb.to_json();
        }
        self.call("editMessageText", &body).await?;
        Ok(())
    }

    /// Acknowledge a button press; `alert` pops a modal instead of a toast.
    pub async fn answer_callback(&self, callback_id: &str, text: &str, alert: bool) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            &json!({
                "callback_query_id": callback_id,
                "text": text,
                "show_alert": alert,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn set_my_commands(&self, commands: &[(String, String)]) -> Result<()> {
        let list: Vec<Value> = commands
            .iter()
            .map(|(cmd, desc)| json!({"command": cmd, "description": desc}))
            .collect();
        self.call("setMyCommands", &json!({ "commands": list })).await?;
        Ok(())
    }

    /// Direct message a user. A 403 means the user never started the bot;
    /// that is an expected outcome, not an error.
    pub async fn send_direct(&self, user_id: i64, text: &str) -> SendOutcome {
        let body = json!({
            "chat_id": user_id,
            "text": text,
            "parse_mode": "HTML",
        });
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await;
        let resp: Value = match resp {
            Ok(r) => match r.json().await {
                Ok(v) => v,
                Err(e) => return SendOutcome::Transient(e.to_string()),
            },
            Err(e) => return SendOutcome::Transient(e.to_string()),
        };
        if resp["ok"] == true {
            return SendOutcome::Delivered;
        }
        if resp["error_code"].as_i64() == Some(403) {
            warn!("user {user_id} has not started the bot, direct message dropped");
            return SendOutcome::UserUnreachable;
        }
        SendOutcome::Transient(
            resp["description"]
                .as_str()
                .unwrap_or("unknown send failure")
                .to_string(),
        )
    }
}

fn sender_name(from: &Value) -> String {
    from["username"]
        .as_str()
        .or_else(|| from["first_name"].as_str())
        .unwrap_or("未知用户")
        .to_string()
}

/// One raw update object into a routable event. Non-text messages and
/// data-less callbacks are dropped.
pub fn parse_update(update: &Value) -> Option<TgUpdate> {
    if let Some(cb) = update.get("callback_query") {
        let data = cb["data"].as_str()?;
        return Some(TgUpdate::Callback(TgCallback {
            callback_id: cb["id"].as_str().unwrap_or_default().to_string(),
            chat_id: cb["message"]["chat"]["id"].as_i64().unwrap_or(0),
            message_id: cb["message"]["message_id"].as_i64().unwrap_or(0),
            user_id: cb["from"]["id"].as_i64().unwrap_or(0),
            username: sender_name(&cb["from"]),
            data: data.to_string(),
        }));
    }

    let msg = update.get("message")?;
    let text = msg["text"].as_str()?;
    Some(TgUpdate::Message(TgMessage {
        message_id: msg["message_id"].as_i64().unwrap_or(0),
        chat_id: msg["chat"]["id"].as_i64().unwrap_or(0),
        chat_type: msg["chat"]["type"].as_str().unwrap_or("private").to_string(),
        user_id: msg["from"]["id"].as_i64().unwrap_or(0),
        username: sender_name(&msg["from"]),
        text: text.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_serialises_rows() {
        let kb = InlineKeyboard::new()
            .row(vec![
                ("✅ 通过".into(), "approve:WF-1".into()),
                ("❌ 拒绝".into(), "reject:WF-1".into()),
            ])
            .row(vec![("svc".into(), "select_service:svc".into())]);
        let v = kb.to_json();
        assert_eq!(v["inline_keyboard"][0][0]["callback_data"], "approve:WF-1");
        assert_eq!(v["inline_keyboard"][1][0]["text"], "svc");
    }

    #[test]
    fn sender_name_prefers_username() {
        let with_username = json!({"username": "alice", "first_name": "Alice"});
        assert_eq!(sender_name(&with_username), "alice");
        let first_only = json!({"first_name": "Bob"});
        assert_eq!(sender_name(&first_only), "Bob");
        assert_eq!(sender_name(&json!({})), "未知用户");
    }

    #[test]
    fn parses_text_message_update() {
        let update = json!({
            "update_id": 7,
            "message": {
                "message_id": 101,
                "chat": {"id": -1001, "type": "supergroup"},
                "from": {"id": 42, "username": "alice"},
                "text": "/deploy_ebpay"
            }
        });
        let Some(TgUpdate::Message(msg)) = parse_update(&update) else {
            panic!("expected a message update");
        };
        assert_eq!(msg.chat_id, -1001);
        assert_eq!(msg.user_id, 42);
        assert_eq!(msg.username, "alice");
        assert_eq!(msg.text, "/deploy_ebpay");
        assert_eq!(msg.chat_type, "supergroup");
    }

    #[test]
    fn parses_callback_update() {
        let update = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cbq-1",
                "from": {"id": 7, "username": "boss"},
                "message": {"message_id": 55, "chat": {"id": -1001, "type": "supergroup"}},
                "data": "approve:WF-20260801-00C0FFEE"
            }
        });
        let Some(TgUpdate::Callback(cb)) = parse_update(&update) else {
            panic!("expected a callback update");
        };
        assert_eq!(cb.callback_id, "cbq-1");
        assert_eq!(cb.message_id, 55);
        assert_eq!(cb.data, "approve:WF-20260801-00C0FFEE");
    }

    #[test]
    fn non_text_updates_are_dropped() {
        // Photo message: no text field.
        let photo = json!({
            "update_id": 9,
            "message": {"message_id": 1, "chat": {"id": 5, "type": "private"},
                        "from": {"id": 2}, "photo": []}
        });
        assert!(parse_update(&photo).is_none());
        // Callback without data.
        let empty_cb = json!({"update_id": 10, "callback_query": {"id": "x", "from": {"id": 2}}});
        assert!(parse_update(&empty_cb).is_none());
        // Edited messages and other update kinds.
        assert!(parse_update(&json!({"update_id": 11, "edited_message": {}})).is_none());
    }
}

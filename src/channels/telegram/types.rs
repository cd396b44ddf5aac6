//! Bot API wire types. Only the fields the relay reads are modelled.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    /// Present on photo messages.
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<serde_json::Value>,
}

impl Message {
    pub fn has_photo(&self) -> bool {
        !self.photo.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// One button per row.
    pub fn single_column(buttons: Vec<InlineKeyboardButton>) -> Self {
        Self {
            inline_keyboard: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_with_message() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "chat": {"id": 42, "type": "private"},
                "from": {"id": 42, "is_bot": false, "first_name": "A"},
                "text": "https://fb.watch/x"
            }
        }))
        .unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 42);
        assert_eq!(message.chat.kind, "private");
        assert_eq!(message.text.as_deref(), Some("https://fb.watch/x"));
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn test_update_with_callback() {
        let update: Update = serde_json::from_value(json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 42, "first_name": "A"},
                "data": "dl:abc:0",
                "message": {"message_id": 6, "chat": {"id": 42}, "photo": [{"file_id": "x"}]}
            }
        }))
        .unwrap();
        let query = update.callback_query.unwrap();
        assert_eq!(query.data.as_deref(), Some("dl:abc:0"));
        assert!(query.message.unwrap().has_photo());
    }

    #[test]
    fn test_keyboard_serialization_skips_empty_fields() {
        let markup = InlineKeyboardMarkup::single_column(vec![
            InlineKeyboardButton::callback("HD", "dl:abc:0"),
            InlineKeyboardButton::url("Open", "https://cdn.example/v.mp4"),
        ]);
        let value = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            value,
            json!({"inline_keyboard": [
                [{"text": "HD", "callback_data": "dl:abc:0"}],
                [{"text": "Open", "url": "https://cdn.example/v.mp4"}]
            ]})
        );
    }
}

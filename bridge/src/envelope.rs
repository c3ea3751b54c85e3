//! Wire schema. Every message on every channel is an [`Envelope`]; the
//! typed enums below are its decoded forms and are matched exhaustively.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;
use crate::model::{BookInfo, BookRef, ExtInfo, Field, FieldValue, MutationRequest};

pub const KIND_GET_BOOK_INFO: &str = "get_book_info";
pub const KIND_MUTATE: &str = "mutate";
pub const KIND_SHOW_BOOK_INFO: &str = "show_book_info";
pub const KIND_TOGGLE_DL: &str = "toggle_dl";
pub const KIND_TOGGLE_FAV: &str = "toggle_fav";
pub const KIND_SET_LISTS: &str = "set_lists";
pub const KIND_ERROR: &str = "error";
pub const KIND_ROLLBACK: &str = "rollback";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Envelope {
            kind: kind.into(),
            payload,
        }
    }

    fn encode<T: Serialize>(message: &T) -> Self {
        // Adjacently tagged enums of plain data always serialize to
        // {"kind", "payload"}.
        match serde_json::to_value(message) {
            Ok(Value::Object(mut map)) => {
                let kind = match map.remove("kind") {
                    Some(Value::String(kind)) => kind,
                    _ => String::new(),
                };
                let payload = map.remove("payload").unwrap_or(Value::Null);
                Envelope { kind, payload }
            }
            _ => Envelope::new(String::new(), Value::Null),
        }
    }

    fn decode<T: DeserializeOwned>(&self, known: &[&str]) -> Result<T, BridgeError> {
        if !known.contains(&self.kind.as_str()) {
            return Err(BridgeError::UnknownKind(self.kind.clone()));
        }
        let tagged = serde_json::json!({ "kind": self.kind, "payload": self.payload });
        Ok(serde_json::from_value(tagged)?)
    }
}

/// Messages exchanged between browser contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Page -> background.
    #[serde(rename_all = "camelCase")]
    GetBookInfo { book_ref: BookRef },
    /// Popup -> background.
    Mutate(MutationRequest),
    #[serde(rename_all = "camelCase")]
    ShowBookInfo {
        cover_url: Option<String>,
        book_info: Option<BookInfo>,
        ext_info: Option<ExtInfo>,
    },
    #[serde(rename_all = "camelCase")]
    ToggleDl { ext_info_id: i64, downloaded: bool },
    #[serde(rename_all = "camelCase")]
    ToggleFav { book_id: i64, favorite: bool },
    #[serde(rename_all = "camelCase")]
    SetLists { book_id: i64, list: String },
    Error { reason: String },
    Rollback {
        field: Field,
        id: i64,
        value: FieldValue,
    },
}

const MESSAGE_KINDS: &[&str] = &[
    KIND_GET_BOOK_INFO,
    KIND_MUTATE,
    KIND_SHOW_BOOK_INFO,
    KIND_TOGGLE_DL,
    KIND_TOGGLE_FAV,
    KIND_SET_LISTS,
    KIND_ERROR,
    KIND_ROLLBACK,
];

impl Message {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::encode(self)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, BridgeError> {
        envelope.decode(MESSAGE_KINDS)
    }
}

/// Calls the bridge makes on the native peer.
///
/// Toggles carry the value the popup saw next to the one it wants. A peer
/// whose stored value no longer equals `previous` flips what it has instead,
/// so toggles from popups that read the same value apply one after another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum NativeCall {
    #[serde(rename_all = "camelCase")]
    GetBookInfo { book_ref: BookRef },
    #[serde(rename_all = "camelCase")]
    ToggleDl {
        ext_info_id: i64,
        downloaded: bool,
        previous: bool,
    },
    #[serde(rename_all = "camelCase")]
    ToggleFav {
        book_id: i64,
        favorite: bool,
        previous: bool,
    },
    #[serde(rename_all = "camelCase")]
    SetLists { book_id: i64, list: String },
}

const NATIVE_KINDS: &[&str] = &[
    KIND_GET_BOOK_INFO,
    KIND_TOGGLE_DL,
    KIND_TOGGLE_FAV,
    KIND_SET_LISTS,
];

impl NativeCall {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::encode(self)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, BridgeError> {
        envelope.decode(NATIVE_KINDS)
    }

    /// Maps a popup edit onto the peer call that writes the new value.
    pub fn for_mutation(req: &MutationRequest) -> Self {
        match req {
            MutationRequest::ToggleDownload {
                ext_info_id,
                previous_value,
            } => NativeCall::ToggleDl {
                ext_info_id: *ext_info_id,
                downloaded: !previous_value,
                previous: *previous_value,
            },
            MutationRequest::ToggleFavorite {
                book_id,
                previous_value,
            } => NativeCall::ToggleFav {
                book_id: *book_id,
                favorite: !previous_value,
                previous: *previous_value,
            },
            MutationRequest::SetList {
                book_id, new_value, ..
            } => NativeCall::SetLists {
                book_id: *book_id,
                list: new_value.clone(),
            },
        }
    }
}

/// Bridge -> peer frame: an envelope plus a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeFrame {
    pub id: u64,
    #[serde(flatten)]
    pub envelope: Envelope,
}

/// Peer -> bridge frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeReply {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl NativeReply {
    pub fn ok(id: u64, payload: Value) -> Self {
        NativeReply {
            id,
            success: true,
            error: None,
            payload: Some(payload),
        }
    }

    pub fn failed(id: u64, error: impl Into<String>) -> Self {
        NativeReply {
            id,
            success: false,
            error: Some(error.into()),
            payload: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedConfirm {
    pub downloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteConfirm {
    pub favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListConfirm {
    pub list: String,
}

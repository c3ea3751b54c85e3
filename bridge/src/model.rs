//! Book metadata carried across the bridge. The native peer owns the
//! authoritative copies; everything here is a snapshot inside one message.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a book as seen on a web page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRef {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookInfo {
    pub book_id: i64,
    pub title: String,
    pub list: String,
    pub last_change: NaiveDate,
    pub favorite: bool,
    pub web_gui_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Censorship {
    #[default]
    Unknown,
    Censored,
    Decensored,
    Uncensored,
}

impl fmt::Display for Censorship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Censorship::Unknown => "Unknown",
            Censorship::Censored => "Censored",
            Censorship::Decensored => "Decensored",
            Censorship::Uncensored => "Uncensored",
        };
        f.write_str(name)
    }
}

/// An external-site listing matched to a [`BookInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtInfo {
    pub ext_info_id: i64,
    pub uploader: String,
    pub upload_date: NaiveDate,
    #[serde(default)]
    pub censorship: Censorship,
    pub downloaded: bool,
    pub last_update: NaiveDate,
    /// More than one listing matched; the UI has to disclose this.
    #[serde(default)]
    pub multiple_ei: bool,
}

/// How the external listing for a looked-up book resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtMatch {
    None,
    Unique,
    Ambiguous,
}

impl ExtMatch {
    pub fn of(ext_info: Option<&ExtInfo>) -> Self {
        match ext_info {
            None => ExtMatch::None,
            Some(ei) if ei.multiple_ei => ExtMatch::Ambiguous,
            Some(_) => ExtMatch::Unique,
        }
    }
}

/// The peer's answer to `get_book_info`: a positional
/// `[coverUrl, bookInfo, extInfo]` triple on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LookupReply(
    pub Option<String>,
    pub Option<BookInfo>,
    pub Option<ExtInfo>,
);

impl LookupReply {
    pub fn cover_url(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Drops a BookInfo without a title, and any ExtInfo that would be left
    /// without its book.
    pub fn normalized(self) -> Self {
        let LookupReply(cover_url, book_info, ext_info) = self;
        match book_info {
            Some(bi) if !bi.title.trim().is_empty() => LookupReply(cover_url, Some(bi), ext_info),
            _ => LookupReply(cover_url, None, None),
        }
    }
}

/// A user edit from the popup, carrying the value it replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationRequest {
    #[serde(rename_all = "camelCase")]
    ToggleDownload { ext_info_id: i64, previous_value: bool },
    #[serde(rename_all = "camelCase")]
    ToggleFavorite { book_id: i64, previous_value: bool },
    #[serde(rename_all = "camelCase")]
    SetList {
        book_id: i64,
        previous_value: String,
        new_value: String,
    },
}

/// Which displayed value a mutation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Downloaded,
    Favorite,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl MutationRequest {
    pub fn field(&self) -> Field {
        match self {
            MutationRequest::ToggleDownload { .. } => Field::Downloaded,
            MutationRequest::ToggleFavorite { .. } => Field::Favorite,
            MutationRequest::SetList { .. } => Field::List,
        }
    }

    /// Book id or ext info id, depending on the field.
    pub fn target_id(&self) -> i64 {
        match self {
            MutationRequest::ToggleDownload { ext_info_id, .. } => *ext_info_id,
            MutationRequest::ToggleFavorite { book_id, .. }
            | MutationRequest::SetList { book_id, .. } => *book_id,
        }
    }

    pub fn previous_value(&self) -> FieldValue {
        match self {
            MutationRequest::ToggleDownload { previous_value, .. }
            | MutationRequest::ToggleFavorite { previous_value, .. } => {
                FieldValue::Flag(*previous_value)
            }
            MutationRequest::SetList { previous_value, .. } => {
                FieldValue::Text(previous_value.clone())
            }
        }
    }
}

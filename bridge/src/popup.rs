//! Popup side: renders what the controller broadcasts and turns user edits
//! into optimistic updates plus mutation requests.

use std::fmt;
use std::time::Duration;

use crate::channel::{Endpoint, Target};
use crate::envelope::{Envelope, Message};
use crate::model::{BookInfo, ExtInfo, ExtMatch, Field, FieldValue, MutationRequest};

pub const NO_MATCH_NOTICE: &str = "No matching external info!";
pub const MULTIPLE_EI_WARNING: &str = "Multiple external listings matched this book!";

/// What the popup currently displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupView {
    pub cover_url: Option<String>,
    pub book: BookInfo,
    /// `None` hides the external info panel.
    pub ext: Option<ExtInfo>,
}

impl PopupView {
    pub fn ext_match(&self) -> ExtMatch {
        ExtMatch::of(self.ext.as_ref())
    }

    pub fn notice(&self) -> Option<&'static str> {
        match self.ext_match() {
            ExtMatch::None => Some(NO_MATCH_NOTICE),
            ExtMatch::Unique | ExtMatch::Ambiguous => None,
        }
    }

    pub fn shows_multiple_ei_warning(&self) -> bool {
        self.ext_match() == ExtMatch::Ambiguous
    }
}

impl fmt::Display for PopupView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cover_url) = &self.cover_url {
            writeln!(f, "Cover:       {}", cover_url)?;
        }
        writeln!(f, "Title:       {}", self.book.title)?;
        writeln!(f, "List:        {}", self.book.list)?;
        writeln!(f, "Favorite:    {}", yes_no(self.book.favorite))?;
        writeln!(f, "Last change: {}", self.book.last_change)?;
        writeln!(f, "Web GUI:     {}", self.book.web_gui_url)?;
        match &self.ext {
            Some(ei) => {
                if ei.multiple_ei {
                    writeln!(f, "! {}", MULTIPLE_EI_WARNING)?;
                }
                writeln!(f, "Uploader:    {}", ei.uploader)?;
                writeln!(f, "Upload date: {}", ei.upload_date)?;
                writeln!(f, "Censorship:  {}", ei.censorship)?;
                writeln!(f, "Downloaded:  {}", yes_no(ei.downloaded))?;
                write!(f, "Last update: {}", ei.last_update)
            }
            None => write!(f, "! {}", NO_MATCH_NOTICE),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupState {
    Empty,
    Loading,
    Populated(PopupView),
    /// Both panels hidden. `None` is the blank state for a book the peer
    /// does not know; `Some` carries a transport failure to show.
    Error(Option<String>),
}

pub struct PopupPresenter {
    endpoint: Endpoint,
    state: PopupState,
}

impl PopupPresenter {
    pub fn new(endpoint: Endpoint) -> Self {
        PopupPresenter {
            endpoint,
            state: PopupState::Empty,
        }
    }

    pub fn state(&self) -> &PopupState {
        &self.state
    }

    pub fn view(&self) -> Option<&PopupView> {
        match &self.state {
            PopupState::Populated(view) => Some(view),
            _ => None,
        }
    }

    /// `Empty -> Loading`. The page lookup itself is triggered by the
    /// content script injected alongside the popup.
    pub fn open(&mut self) -> bool {
        if self.state == PopupState::Empty {
            self.state = PopupState::Loading;
            true
        } else {
            false
        }
    }

    /// Applies everything queued for this popup, waiting up to `timeout`
    /// for the first envelope. Returns how many envelopes were applied.
    pub fn pump(&mut self, timeout: Duration) -> usize {
        let mut applied = 0;
        let mut next = self.endpoint.recv_timeout(timeout);
        while let Some(delivery) = next {
            self.apply(&delivery.envelope);
            applied += 1;
            next = self.endpoint.try_recv();
        }
        applied
    }

    pub fn apply(&mut self, envelope: &Envelope) {
        let message = match Message::from_envelope(envelope) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Popup {} ignoring envelope: {}", self.endpoint.id(), e);
                return;
            }
        };

        match message {
            Message::ShowBookInfo {
                cover_url,
                book_info,
                ext_info,
            } => {
                let refresh = match (&self.state, &book_info) {
                    (PopupState::Empty | PopupState::Loading, _) => true,
                    (PopupState::Populated(view), Some(book)) => view.book.book_id == book.book_id,
                    (PopupState::Populated(_), None) | (PopupState::Error(_), _) => false,
                };
                if !refresh {
                    log::debug!(
                        "Popup {} keeping its view, lookup was for another page",
                        self.endpoint.id()
                    );
                    return;
                }
                self.state = match book_info {
                    Some(book) => PopupState::Populated(PopupView {
                        cover_url,
                        book,
                        ext: ext_info,
                    }),
                    None => PopupState::Error(None),
                };
            }
            Message::Error { reason } => match self.state {
                PopupState::Empty | PopupState::Loading => {
                    self.state = PopupState::Error(Some(reason));
                }
                PopupState::Populated(_) | PopupState::Error(_) => {
                    log::debug!("Popup {} ignoring late error: {}", self.endpoint.id(), reason);
                }
            },
            Message::ToggleDl {
                ext_info_id,
                downloaded,
            } => {
                self.set_field(Field::Downloaded, ext_info_id, FieldValue::Flag(downloaded));
            }
            Message::ToggleFav { book_id, favorite } => {
                self.set_field(Field::Favorite, book_id, FieldValue::Flag(favorite));
            }
            Message::SetLists { book_id, list } => {
                self.set_field(Field::List, book_id, FieldValue::Text(list));
            }
            Message::Rollback { field, id, value } => {
                if self.set_field(field, id, value) {
                    log::info!("Popup {} rolled back {:?} of #{}", self.endpoint.id(), field, id);
                }
            }
            Message::GetBookInfo { .. } | Message::Mutate(_) => {}
        }
    }

    /// Writes `value` into the displayed field if the popup shows record
    /// `id`. Returns whether anything changed.
    fn set_field(&mut self, field: Field, id: i64, value: FieldValue) -> bool {
        let view = match &mut self.state {
            PopupState::Populated(view) => view,
            _ => return false,
        };
        match (field, value) {
            (Field::Downloaded, FieldValue::Flag(flag)) => match &mut view.ext {
                Some(ei) if ei.ext_info_id == id && ei.downloaded != flag => {
                    ei.downloaded = flag;
                    true
                }
                _ => false,
            },
            (Field::Favorite, FieldValue::Flag(flag)) => {
                if view.book.book_id == id && view.book.favorite != flag {
                    view.book.favorite = flag;
                    true
                } else {
                    false
                }
            }
            (Field::List, FieldValue::Text(list)) => {
                if view.book.book_id == id && view.book.list != list {
                    view.book.list = list;
                    true
                } else {
                    false
                }
            }
            (field, value) => {
                log::warn!("Mismatched value {:?} for field {:?}", value, field);
                false
            }
        }
    }

    pub fn toggle_favorite(&mut self) -> Option<MutationRequest> {
        let book = &self.view()?.book;
        let (book_id, favorite) = (book.book_id, book.favorite);
        let req = MutationRequest::ToggleFavorite {
            book_id,
            previous_value: favorite,
        };
        self.set_field(Field::Favorite, book_id, FieldValue::Flag(!favorite));
        self.emit(req)
    }

    pub fn toggle_download(&mut self) -> Option<MutationRequest> {
        let ei = self.view()?.ext.as_ref()?;
        let (ext_info_id, downloaded) = (ei.ext_info_id, ei.downloaded);
        let req = MutationRequest::ToggleDownload {
            ext_info_id,
            previous_value: downloaded,
        };
        self.set_field(Field::Downloaded, ext_info_id, FieldValue::Flag(!downloaded));
        self.emit(req)
    }

    pub fn set_list(&mut self, list: &str) -> Option<MutationRequest> {
        let book = &self.view()?.book;
        if book.list == list {
            return None;
        }
        let req = MutationRequest::SetList {
            book_id: book.book_id,
            previous_value: book.list.clone(),
            new_value: list.to_string(),
        };
        self.set_field(Field::List, req.target_id(), FieldValue::Text(list.to_string()));
        self.emit(req)
    }

    /// Sends the request to the background. If it cannot leave the popup the
    /// optimistic update is reverted on the spot.
    fn emit(&mut self, req: MutationRequest) -> Option<MutationRequest> {
        let envelope = Message::Mutate(req.clone()).to_envelope();
        match self.endpoint.send(Target::Background, envelope) {
            Ok(_pending) => Some(req),
            Err(e) => {
                log::error!("Popup {} could not send mutation: {}", self.endpoint.id(), e);
                self.set_field(req.field(), req.target_id(), req.previous_value());
                None
            }
        }
    }
}

//! Content-script side: reports the book page it runs on to the background.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::channel::{Endpoint, Target};
use crate::envelope::Message;
use crate::model::BookRef;

/// What the content script reads off a book page: the rendered title
/// element and the current URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
}

impl PageSnapshot {
    pub fn book_ref(&self) -> BookRef {
        BookRef {
            url: self.url.trim().to_string(),
            title: self.title.trim().to_string(),
        }
    }
}

/// Content-script side. Lives for one page load and reports the page at
/// most once.
pub struct PageExtractor {
    endpoint: Endpoint,
    sent: AtomicBool,
}

impl PageExtractor {
    pub fn new(endpoint: Endpoint) -> Self {
        PageExtractor {
            endpoint,
            sent: AtomicBool::new(false),
        }
    }

    /// Sends `get_book_info` for `page`. Returns whether the envelope left
    /// this context; failures are dropped.
    pub fn run(&self, page: &PageSnapshot) -> bool {
        if self.sent.swap(true, Ordering::SeqCst) {
            log::debug!("Page already reported from {}", self.endpoint.id());
            return false;
        }
        let message = Message::GetBookInfo {
            book_ref: page.book_ref(),
        };
        match self.endpoint.send(Target::Background, message.to_envelope()) {
            Ok(_pending) => true,
            Err(e) => {
                log::debug!("Dropping page report from {}: {}", self.endpoint.id(), e);
                false
            }
        }
    }
}

//! Messaging bridge between the MangaDB browser extension contexts (page
//! content script, popup) and the native MangaDB companion process.

pub mod channel;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod extractor;
pub mod keylock;
pub mod logging;
pub mod model;
pub mod native;
pub mod popup;

pub use channel::{BrowserBus, ContextId, Delivery, Endpoint, Pending, Target};
pub use controller::Controller;
pub use envelope::{Envelope, Message, NativeCall, NativeFrame, NativeReply};
pub use error::BridgeError;
pub use extractor::{PageExtractor, PageSnapshot};
pub use model::{
    BookInfo, BookRef, Censorship, ExtInfo, ExtMatch, Field, FieldValue, LookupReply,
    MutationRequest,
};
pub use native::{NativeChannel, NativePort};
pub use popup::{PopupPresenter, PopupState, PopupView};

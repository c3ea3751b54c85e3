//! The background-side controller. It is the only component attached to
//! both the browser bus and the native peer.

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::{Delivery, Endpoint};
use crate::envelope::{
    DownloadedConfirm, Envelope, FavoriteConfirm, ListConfirm, Message, NativeCall,
};
use crate::error::BridgeError;
use crate::keylock::{KeyLocks, RequestKey, Ticket};
use crate::model::{BookRef, LookupReply, MutationRequest};
use crate::native::NativeChannel;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Controller {
    native: RwLock<Arc<dyn NativeChannel>>,
    endpoint: Endpoint,
    keys: KeyLocks,
    timeout: Duration,
    running: AtomicBool,
}

impl Controller {
    pub fn new(native: Arc<dyn NativeChannel>, endpoint: Endpoint, timeout: Duration) -> Arc<Self> {
        Arc::new(Controller {
            native: RwLock::new(native),
            endpoint,
            keys: KeyLocks::new(),
            timeout,
            running: AtomicBool::new(true),
        })
    }

    /// Spawns the receive loop. Deliveries are handled on worker threads so
    /// one slow peer call does not hold up unrelated requests.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        thread::spawn(move || this.run())
    }

    fn run(self: Arc<Self>) {
        log::info!("Bridge controller started");
        while self.running.load(Ordering::Relaxed) {
            if let Some(delivery) = self.endpoint.recv_timeout(POLL_INTERVAL) {
                self.dispatch(delivery);
            }
        }
        log::info!("Bridge controller stopped");
    }

    /// Queues `delivery` behind earlier requests for the same key, then
    /// handles it on its own thread.
    pub fn dispatch(self: &Arc<Self>, delivery: Delivery) {
        let message = match Message::from_envelope(&delivery.envelope) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping envelope from {}: {}", delivery.from, e);
                return;
            }
        };
        let ticket = request_key(&message).map(|key| self.keys.enqueue(key));
        let this = Arc::clone(self);
        thread::spawn(move || this.handle(delivery, message, ticket));
    }

    fn handle(&self, mut delivery: Delivery, message: Message, ticket: Option<Ticket>) {
        let _guard = ticket.map(|t| self.keys.wait_turn(t));
        let outcome = match message {
            Message::GetBookInfo { book_ref } => self.lookup(book_ref),
            Message::Mutate(req) => self.mutate(req),
            Message::ShowBookInfo { .. }
            | Message::ToggleDl { .. }
            | Message::ToggleFav { .. }
            | Message::SetLists { .. }
            | Message::Error { .. }
            | Message::Rollback { .. } => {
                log::debug!(
                    "Ignoring {} from {}: not addressed to the background",
                    delivery.envelope.kind,
                    delivery.from
                );
                return;
            }
        };
        delivery.respond(outcome);
    }

    /// Looks `book_ref` up on the peer and broadcasts exactly one envelope:
    /// `show_book_info` or `error`.
    pub fn on_page_book_info(&self, book_ref: BookRef) -> Envelope {
        let _guard = self.keys.acquire(RequestKey::Page(book_ref.url.clone()));
        self.lookup(book_ref)
    }

    /// Writes the edit through to the peer. Broadcasts the narrow echo on
    /// success and a rollback to the previous value on any failure.
    pub fn on_mutation_request(&self, req: MutationRequest) -> Envelope {
        let _guard = self.keys.acquire(mutation_key(&req));
        self.mutate(req)
    }

    fn lookup(&self, book_ref: BookRef) -> Envelope {
        log::info!("Looking up {:?} ({})", book_ref.title, book_ref.url);
        let call = NativeCall::GetBookInfo { book_ref };
        let message = match self.call::<LookupReply>(&call) {
            Ok(reply) => {
                let LookupReply(cover_url, book_info, ext_info) = reply.normalized();
                Message::ShowBookInfo {
                    cover_url,
                    book_info,
                    ext_info,
                }
            }
            Err(e) => {
                log::error!("Book lookup failed: {}", e);
                Message::Error {
                    reason: e.to_string(),
                }
            }
        };
        self.broadcast(&message)
    }

    fn mutate(&self, req: MutationRequest) -> Envelope {
        log::info!("Mutation {:?}", req);
        let message = match self.apply_mutation(&req) {
            Ok(message) => message,
            Err(e) => {
                log::error!("Mutation failed, rolling back: {}", e);
                Message::Rollback {
                    field: req.field(),
                    id: req.target_id(),
                    value: req.previous_value(),
                }
            }
        };
        self.broadcast(&message)
    }

    fn apply_mutation(&self, req: &MutationRequest) -> Result<Message, BridgeError> {
        let call = NativeCall::for_mutation(req);
        let message = match &call {
            NativeCall::ToggleDl { ext_info_id, .. } => {
                let confirm: DownloadedConfirm = self.call(&call)?;
                Message::ToggleDl {
                    ext_info_id: *ext_info_id,
                    downloaded: confirm.downloaded,
                }
            }
            NativeCall::ToggleFav { book_id, .. } => {
                let confirm: FavoriteConfirm = self.call(&call)?;
                Message::ToggleFav {
                    book_id: *book_id,
                    favorite: confirm.favorite,
                }
            }
            NativeCall::SetLists { book_id, .. } => {
                let confirm: ListConfirm = self.call(&call)?;
                Message::SetLists {
                    book_id: *book_id,
                    list: confirm.list,
                }
            }
            NativeCall::GetBookInfo { .. } => {
                return Err(BridgeError::UnknownKind(call.to_envelope().kind));
            }
        };
        Ok(message)
    }

    fn call<T: DeserializeOwned>(&self, call: &NativeCall) -> Result<T, BridgeError> {
        let native = self.native();
        if !native.is_connected() {
            return Err(BridgeError::ChannelUnavailable);
        }
        let payload = native.request(call, self.timeout).map_err(|e| match (call, e) {
            (NativeCall::GetBookInfo { .. }, e) => e,
            (_, BridgeError::PeerError(reason)) => BridgeError::MutationRejected(reason),
            (_, e) => e,
        })?;
        Ok(serde_json::from_value(payload)?)
    }

    fn broadcast(&self, message: &Message) -> Envelope {
        let envelope = message.to_envelope();
        let reached = self.endpoint.broadcast(&envelope);
        log::debug!("Broadcast {} to {} context(s)", envelope.kind, reached);
        envelope
    }

    fn native(&self) -> Arc<dyn NativeChannel> {
        self.native.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True while the peer is gone and every request fails fast.
    pub fn is_degraded(&self) -> bool {
        !self.native().is_connected()
    }

    /// Replaces a lost peer connection.
    pub fn reconnect(&self, native: Arc<dyn NativeChannel>) {
        let mut current = self.native.write().unwrap_or_else(|e| e.into_inner());
        current.shutdown();
        *current = native;
        log::info!("Native peer reconnected");
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.native().shutdown();
    }
}

fn request_key(message: &Message) -> Option<RequestKey> {
    match message {
        Message::GetBookInfo { book_ref } => Some(RequestKey::Page(book_ref.url.clone())),
        Message::Mutate(req) => Some(mutation_key(req)),
        _ => None,
    }
}

fn mutation_key(req: &MutationRequest) -> RequestKey {
    match req {
        MutationRequest::ToggleDownload { ext_info_id, .. } => RequestKey::ExtInfo(*ext_info_id),
        MutationRequest::ToggleFavorite { book_id, .. } | MutationRequest::SetList { book_id, .. } => {
            RequestKey::Book(*book_id)
        }
    }
}

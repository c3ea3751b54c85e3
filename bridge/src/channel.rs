//! Intra-browser transport: content scripts, the background and popups
//! exchange envelopes over per-context queues. There is no subscription
//! step; attaching a context is enough to receive broadcasts.

use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::envelope::Envelope;
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Background,
    Tab(u32),
    Popup(u32),
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextId::Background => write!(f, "background"),
            ContextId::Tab(id) => write!(f, "tab#{}", id),
            ContextId::Popup(id) => write!(f, "popup#{}", id),
        }
    }
}

/// Where a `send` goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Background,
    ActiveTab,
}

/// One envelope as received by a context.
#[derive(Debug)]
pub struct Delivery {
    pub from: ContextId,
    pub envelope: Envelope,
    reply: Option<Sender<Envelope>>,
}

impl Delivery {
    /// Answers the sender's pending `send`. A sender that stopped waiting is
    /// not an error.
    pub fn respond(&mut self, envelope: Envelope) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(envelope);
        }
    }
}

/// The response side of a `send`.
#[derive(Debug)]
pub struct Pending {
    rx: Receiver<Envelope>,
}

impl Pending {
    pub fn wait(self, timeout: Duration) -> Result<Envelope, BridgeError> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => Ok(envelope),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout(timeout.as_millis())),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::ChannelUnavailable),
        }
    }
}

#[derive(Default)]
struct BusState {
    contexts: HashMap<ContextId, (u64, Sender<Delivery>)>,
    active_tab: Option<u32>,
    generation: u64,
}

#[derive(Clone, Default)]
pub struct BrowserBus {
    state: Arc<Mutex<BusState>>,
}

impl BrowserBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attaches a context. Re-attaching an id replaces the previous queue.
    pub fn attach(&self, id: ContextId) -> Endpoint {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state();
        state.generation += 1;
        let generation = state.generation;
        state.contexts.insert(id, (generation, tx));
        if let ContextId::Tab(tab) = id {
            state.active_tab = Some(tab);
        }
        Endpoint {
            id,
            generation,
            bus: self.clone(),
            rx: Mutex::new(rx),
        }
    }

    pub fn detach(&self, id: ContextId) {
        self.detach_generation(id, None);
    }

    fn detach_generation(&self, id: ContextId, generation: Option<u64>) {
        let mut state = self.state();
        match (state.contexts.get(&id), generation) {
            (Some((current, _)), Some(generation)) if *current != generation => return,
            (None, _) => return,
            _ => {}
        }
        state.contexts.remove(&id);
        if let ContextId::Tab(tab) = id {
            if state.active_tab == Some(tab) {
                state.active_tab = None;
            }
        }
    }

    pub fn activate_tab(&self, tab: u32) {
        self.state().active_tab = Some(tab);
    }

    pub fn is_attached(&self, id: ContextId) -> bool {
        self.state().contexts.contains_key(&id)
    }

    fn deliver(
        &self,
        from: ContextId,
        target: Target,
        envelope: Envelope,
    ) -> Result<Pending, BridgeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut state = self.state();
        let to = match target {
            Target::Background => ContextId::Background,
            Target::ActiveTab => match state.active_tab {
                Some(tab) => ContextId::Tab(tab),
                None => return Err(BridgeError::ChannelUnavailable),
            },
        };
        let (_, tx) = state
            .contexts
            .get(&to)
            .ok_or(BridgeError::ChannelUnavailable)?;
        let delivery = Delivery {
            from,
            envelope,
            reply: Some(reply_tx),
        };
        if tx.send(delivery).is_err() {
            state.contexts.remove(&to);
            return Err(BridgeError::ChannelUnavailable);
        }
        Ok(Pending { rx: reply_rx })
    }

    fn fan_out(&self, from: ContextId, envelope: &Envelope) -> usize {
        let mut state = self.state();
        let mut closed = Vec::new();
        let mut delivered = 0;
        for (id, (_, tx)) in state.contexts.iter() {
            if *id == from {
                continue;
            }
            let delivery = Delivery {
                from,
                envelope: envelope.clone(),
                reply: None,
            };
            if tx.send(delivery).is_ok() {
                delivered += 1;
            } else {
                closed.push(*id);
            }
        }
        for id in closed {
            log::debug!("Pruning closed context {}", id);
            state.contexts.remove(&id);
        }
        delivered
    }
}

/// A context's handle on the bus.
pub struct Endpoint {
    id: ContextId,
    generation: u64,
    bus: BrowserBus,
    rx: Mutex<Receiver<Delivery>>,
}

impl Endpoint {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn send(&self, target: Target, envelope: Envelope) -> Result<Pending, BridgeError> {
        self.bus.deliver(self.id, target, envelope)
    }

    /// Fire-and-forget to every attached context except this one. Returns
    /// how many contexts took the envelope.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        self.bus.fan_out(self.id, envelope)
    }

    /// Blocks until an envelope arrives, or `None` once the timeout passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Delivery> {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Delivery> {
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        match rx.try_recv() {
            Ok(delivery) => Some(delivery),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.bus.detach_generation(self.id, Some(self.generation));
    }
}

use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mangadb_bridge::{
    BookInfo, BookRef, BridgeError, BrowserBus, ContextId, Controller, Endpoint, Envelope,
    ExtInfo, Message, MutationRequest, NativeCall, NativeChannel, PageExtractor, PageSnapshot,
    PopupPresenter, PopupState,
};

const TIMEOUT: Duration = Duration::from_millis(300);
const WAIT: Duration = Duration::from_secs(3);

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn book(book_id: i64, title: &str, list: &str, favorite: bool) -> BookInfo {
    BookInfo {
        book_id,
        title: title.to_string(),
        list: list.to_string(),
        last_change: date(2020, 7, 17),
        favorite,
        web_gui_url: format!("http://127.0.0.1:5000/book/{}", book_id),
    }
}

fn ext(ext_info_id: i64, downloaded: bool, multiple_ei: bool) -> ExtInfo {
    ExtInfo {
        ext_info_id,
        uploader: "Scanlator".to_string(),
        upload_date: date(2018, 9, 24),
        censorship: Default::default(),
        downloaded,
        last_update: date(2019, 1, 2),
        multiple_ei,
    }
}

fn page() -> BookRef {
    BookRef {
        url: "https://www.tsumino.com/Book/Info/43357/foo".to_string(),
        title: "Foo / フー".to_string(),
    }
}

/// Stands in for the companion: answers from in-memory state and records
/// what it was asked.
#[derive(Default)]
struct FakePeer {
    disconnected: AtomicBool,
    reject_writes: AtomicBool,
    delay: Mutex<Duration>,
    lookup: Mutex<Value>,
    favorites: Mutex<HashMap<i64, bool>>,
    downloads: Mutex<HashMap<i64, bool>>,
    calls: Mutex<Vec<NativeCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakePeer {
    fn answering(cover_url: Option<&str>, book_info: Option<BookInfo>, ext_info: Option<ExtInfo>) -> Arc<Self> {
        let peer = FakePeer::default();
        *peer.lookup.lock().unwrap() = json!([cover_url, book_info, ext_info]);
        Arc::new(peer)
    }

    fn calls(&self) -> Vec<NativeCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl NativeChannel for FakePeer {
    fn request(&self, call: &NativeCall, timeout: Duration) -> Result<Value, BridgeError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelUnavailable);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call.clone());

        let delay = *self.delay.lock().unwrap();
        thread::sleep(delay.min(timeout));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if delay > timeout {
            return Err(BridgeError::Timeout(timeout.as_millis()));
        }

        let is_write = !matches!(call, NativeCall::GetBookInfo { .. });
        if is_write && self.reject_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::PeerError("database is read-only".to_string()));
        }

        Ok(match call {
            NativeCall::GetBookInfo { .. } => self.lookup.lock().unwrap().clone(),
            NativeCall::ToggleDl {
                ext_info_id,
                downloaded,
                previous,
            } => {
                let stored = toggle(&self.downloads, *ext_info_id, *downloaded, *previous);
                json!({ "downloaded": stored })
            }
            NativeCall::ToggleFav {
                book_id,
                favorite,
                previous,
            } => {
                let stored = toggle(&self.favorites, *book_id, *favorite, *previous);
                json!({ "favorite": stored })
            }
            NativeCall::SetLists { list, .. } => json!({ "list": list }),
        })
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

/// Writes `wanted` when the stored flag still equals `previous`, otherwise
/// flips the stored flag. Flags start out false.
fn toggle(flags: &Mutex<HashMap<i64, bool>>, id: i64, wanted: bool, previous: bool) -> bool {
    let mut flags = flags.lock().unwrap();
    let stored = flags.entry(id).or_insert(false);
    *stored = if *stored == previous { wanted } else { !*stored };
    *stored
}

fn drain(endpoint: &Endpoint) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Some(delivery) = endpoint.recv_timeout(Duration::from_millis(50)) {
        out.push(delivery.envelope);
    }
    out
}

fn populated(popup: &mut PopupPresenter, book_info: BookInfo, ext_info: Option<ExtInfo>) {
    popup.open();
    let show = Message::ShowBookInfo {
        cover_url: None,
        book_info: Some(book_info),
        ext_info,
    };
    popup.apply(&show.to_envelope());
    assert!(popup.view().is_some());
}

#[test]
fn test_lookup_broadcasts_exactly_one_show_book_info() {
    let peer = FakePeer::answering(Some("cover.jpg"), Some(book(1, "Foo", "Reading", false)), None);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);
    let listener = bus.attach(ContextId::Popup(1));

    controller.on_page_book_info(page());

    let received = drain(&listener);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind, "show_book_info");
    assert_eq!(received[0].payload["coverUrl"], "cover.jpg");
    assert_eq!(received[0].payload["bookInfo"]["title"], "Foo");
    assert!(received[0].payload["extInfo"].is_null());
    assert_eq!(peer.calls(), vec![NativeCall::GetBookInfo { book_ref: page() }]);
}

#[test]
fn test_lookup_with_unavailable_peer_broadcasts_error() {
    let peer = FakePeer::answering(None, None, None);
    peer.disconnected.store(true, Ordering::SeqCst);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);
    let listener = bus.attach(ContextId::Popup(1));

    assert!(controller.is_degraded());
    controller.on_page_book_info(page());

    let received = drain(&listener);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind, "error");
    assert_eq!(received[0].payload["reason"], "Native peer unavailable");
    assert!(peer.calls().is_empty(), "a degraded controller must not call the peer");
}

#[test]
fn test_lookup_timeout_broadcasts_error() {
    let peer = FakePeer::answering(None, Some(book(1, "Foo", "Reading", false)), None);
    *peer.delay.lock().unwrap() = Duration::from_secs(5);
    let bus = BrowserBus::new();
    let controller = Controller::new(
        peer.clone(),
        bus.attach(ContextId::Background),
        Duration::from_millis(50),
    );
    let listener = bus.attach(ContextId::Popup(1));

    let started = Instant::now();
    let envelope = controller.on_page_book_info(page());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(envelope.kind, "error");

    let received = drain(&listener);
    assert_eq!(received, vec![envelope]);
}

#[test]
fn test_repeated_lookup_yields_identical_broadcasts() {
    let peer = FakePeer::answering(
        Some("cover.jpg"),
        Some(book(1, "Foo", "Reading", true)),
        Some(ext(11, false, false)),
    );
    let bus = BrowserBus::new();
    let controller = Controller::new(peer, bus.attach(ContextId::Background), TIMEOUT);
    let listener = bus.attach(ContextId::Popup(1));

    controller.on_page_book_info(page());
    controller.on_page_book_info(page());

    let received = drain(&listener);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], received[1]);
}

#[test]
fn test_scenario_missing_ext_info_hides_ext_panel() {
    let peer = FakePeer::answering(None, Some(book(1, "Foo", "Reading", false)), None);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer, bus.attach(ContextId::Background), TIMEOUT);
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    popup.open();

    controller.on_page_book_info(page());
    popup.pump(WAIT);

    let view = popup.view().expect("popup should be populated");
    assert_eq!(view.book.title, "Foo");
    assert_eq!(view.book.list, "Reading");
    assert!(view.ext.is_none());
    assert_eq!(view.notice(), Some("No matching external info!"));
    assert!(!view.shows_multiple_ei_warning());
}

#[test]
fn test_scenario_multiple_ei_passes_through_with_warning() {
    let peer = FakePeer::answering(
        Some("cover.jpg"),
        Some(book(1, "Foo", "Reading", false)),
        Some(ext(11, true, true)),
    );
    let bus = BrowserBus::new();
    let controller = Controller::new(peer, bus.attach(ContextId::Background), TIMEOUT);
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    popup.open();

    let envelope = controller.on_page_book_info(page());
    assert_eq!(envelope.payload["extInfo"]["multipleEi"], true);
    popup.pump(WAIT);

    let view = popup.view().expect("popup should be populated");
    assert!(view.shows_multiple_ei_warning());
    assert_eq!(view.notice(), None);
    assert_eq!(view.ext.as_ref().map(|ei| ei.ext_info_id), Some(11));
    assert!(view.to_string().contains("Multiple external listings"));
}

#[test]
fn test_scenario_failed_set_list_rolls_back() {
    let peer = FakePeer::answering(None, None, None);
    peer.reject_writes.store(true, Ordering::SeqCst);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);
    let controller_thread = controller.start();
    let observer = bus.attach(ContextId::Popup(2));

    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    populated(&mut popup, book(3, "Bar", "Plan", false), None);

    let req = popup.set_list("Reading").expect("request should be sent");
    assert_eq!(
        req,
        MutationRequest::SetList {
            book_id: 3,
            previous_value: "Plan".to_string(),
            new_value: "Reading".to_string(),
        }
    );
    assert_eq!(popup.view().unwrap().book.list, "Reading");

    popup.pump(WAIT);
    assert_eq!(popup.view().unwrap().book.list, "Plan");

    let seen = drain(&observer);
    let rollback: Vec<&Envelope> = seen.iter().filter(|e| e.kind == "rollback").collect();
    assert_eq!(rollback.len(), 1);
    assert_eq!(
        rollback[0].payload,
        json!({ "field": "list", "id": 3, "value": "Plan" })
    );

    controller.shutdown();
    controller_thread.join().unwrap();
}

#[test]
fn test_scenario_title_absent_leaves_blank_state() {
    let mut untitled = book(1, "", "Reading", false);
    untitled.title = "   ".to_string();
    let peer = FakePeer::answering(Some("cover.jpg"), Some(untitled), Some(ext(11, false, false)));
    let bus = BrowserBus::new();
    let controller = Controller::new(peer, bus.attach(ContextId::Background), TIMEOUT);
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    popup.open();

    let envelope = controller.on_page_book_info(page());
    assert!(envelope.payload["bookInfo"].is_null());
    assert!(envelope.payload["extInfo"].is_null());

    popup.pump(WAIT);
    assert_eq!(popup.state(), &PopupState::Error(None));
}

#[test]
fn test_failed_toggle_download_restores_previous_value() {
    let peer = FakePeer::answering(None, None, None);
    peer.reject_writes.store(true, Ordering::SeqCst);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer, bus.attach(ContextId::Background), TIMEOUT);
    let controller_thread = controller.start();

    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    populated(&mut popup, book(1, "Foo", "Reading", false), Some(ext(11, false, false)));

    popup.toggle_download().expect("request should be sent");
    assert_eq!(popup.view().unwrap().ext.as_ref().unwrap().downloaded, true);

    popup.pump(WAIT);
    assert_eq!(popup.view().unwrap().ext.as_ref().unwrap().downloaded, false);

    controller.shutdown();
    controller_thread.join().unwrap();
}

#[test]
fn test_successful_toggle_favorite_echoes_to_every_popup() {
    let peer = FakePeer::answering(None, None, None);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);
    let controller_thread = controller.start();

    let mut first = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    let mut second = PopupPresenter::new(bus.attach(ContextId::Popup(2)));
    populated(&mut first, book(7, "Foo", "Reading", false), None);
    populated(&mut second, book(7, "Foo", "Reading", false), None);

    first.toggle_favorite().expect("request should be sent");
    first.pump(WAIT);
    second.pump(WAIT);

    assert!(first.view().unwrap().book.favorite);
    assert!(second.view().unwrap().book.favorite);
    assert_eq!(
        peer.calls(),
        vec![NativeCall::ToggleFav {
            book_id: 7,
            favorite: true,
            previous: false,
        }]
    );

    controller.shutdown();
    controller_thread.join().unwrap();
}

#[test]
fn test_concurrent_toggles_for_same_book_are_serialized() {
    let peer = FakePeer::answering(None, None, None);
    *peer.delay.lock().unwrap() = Duration::from_millis(50);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);

    let req = MutationRequest::ToggleFavorite {
        book_id: 7,
        previous_value: false,
    };
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let controller = Arc::clone(&controller);
            let req = req.clone();
            thread::spawn(move || controller.on_mutation_request(req))
        })
        .collect();
    let mut confirmed: Vec<Value> = handles
        .into_iter()
        .map(|handle| {
            let envelope = handle.join().unwrap();
            assert_eq!(envelope.kind, "toggle_fav");
            envelope.payload["favorite"].clone()
        })
        .collect();
    confirmed.sort_by_key(|v| v.as_bool());

    assert_eq!(peer.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(confirmed, vec![json!(false), json!(true)]);
    assert_eq!(peer.favorites.lock().unwrap().get(&7), Some(&false));
}

#[test]
fn test_two_popups_toggling_same_book_end_in_sequential_state() {
    let peer = FakePeer::answering(None, None, None);
    *peer.delay.lock().unwrap() = Duration::from_millis(30);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);

    let mut first = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    let mut second = PopupPresenter::new(bus.attach(ContextId::Popup(2)));
    populated(&mut first, book(7, "Foo", "Reading", false), None);
    populated(&mut second, book(7, "Foo", "Reading", false), None);

    let requests = vec![
        first.toggle_favorite().expect("first popup sends"),
        second.toggle_favorite().expect("second popup sends"),
    ];
    let handles: Vec<_> = requests
        .into_iter()
        .map(|req| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.on_mutation_request(req))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Two toggles from `false` land on `false`, everywhere.
    assert_eq!(peer.favorites.lock().unwrap().get(&7), Some(&false));
    assert_eq!(first.pump(WAIT), 2);
    assert_eq!(second.pump(WAIT), 2);
    assert!(!first.view().unwrap().book.favorite);
    assert!(!second.view().unwrap().book.favorite);
}

#[test]
fn test_toggles_from_one_popup_reach_peer_in_order() {
    let peer = FakePeer::answering(None, None, None);
    *peer.delay.lock().unwrap() = Duration::from_millis(20);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);
    let controller_thread = controller.start();

    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    populated(&mut popup, book(7, "Foo", "Reading", false), None);

    popup.toggle_favorite().expect("first toggle");
    popup.toggle_favorite().expect("second toggle");
    assert!(!popup.view().unwrap().book.favorite);

    let deadline = Instant::now() + WAIT;
    while peer.calls().len() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    popup.pump(WAIT);

    assert_eq!(
        peer.calls(),
        vec![
            NativeCall::ToggleFav {
                book_id: 7,
                favorite: true,
                previous: false,
            },
            NativeCall::ToggleFav {
                book_id: 7,
                favorite: false,
                previous: true,
            },
        ]
    );
    assert_eq!(peer.favorites.lock().unwrap().get(&7), Some(&false));
    assert_eq!(peer.max_in_flight.load(Ordering::SeqCst), 1);

    controller.shutdown();
    controller_thread.join().unwrap();
}

#[test]
fn test_degraded_controller_fails_fast_and_recovers_on_reconnect() {
    let dead = FakePeer::answering(None, None, None);
    dead.disconnected.store(true, Ordering::SeqCst);
    *dead.delay.lock().unwrap() = Duration::from_secs(10);
    let bus = BrowserBus::new();
    let controller = Controller::new(dead, bus.attach(ContextId::Background), Duration::from_secs(5));

    let req = MutationRequest::ToggleFavorite {
        book_id: 7,
        previous_value: true,
    };
    let started = Instant::now();
    let envelope = controller.on_mutation_request(req.clone());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(envelope.kind, "rollback");
    assert_eq!(envelope.payload, json!({ "field": "favorite", "id": 7, "value": true }));

    let fresh = FakePeer::answering(None, None, None);
    fresh.favorites.lock().unwrap().insert(7, true);
    controller.reconnect(fresh.clone());
    assert!(!controller.is_degraded());

    let envelope = controller.on_mutation_request(req);
    assert_eq!(envelope.kind, "toggle_fav");
    assert_eq!(envelope.payload, json!({ "bookId": 7, "favorite": false }));
}

#[test]
fn test_page_extractor_reports_once_and_controller_answers() {
    let peer = FakePeer::answering(None, Some(book(1, "Foo", "Reading", false)), None);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer.clone(), bus.attach(ContextId::Background), TIMEOUT);
    let controller_thread = controller.start();
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    popup.open();

    let extractor = PageExtractor::new(bus.attach(ContextId::Tab(1)));
    let snapshot = PageSnapshot {
        url: "https://www.tsumino.com/Book/Info/43357/foo".to_string(),
        title: "  Foo / フー \n".to_string(),
    };
    assert!(extractor.run(&snapshot));
    assert!(!extractor.run(&snapshot));

    popup.pump(WAIT);
    assert!(popup.view().is_some());
    assert_eq!(peer.calls(), vec![NativeCall::GetBookInfo { book_ref: page() }]);

    controller.shutdown();
    controller_thread.join().unwrap();
}

#[test]
fn test_page_extractor_drops_report_without_background() {
    let bus = BrowserBus::new();
    let extractor = PageExtractor::new(bus.attach(ContextId::Tab(1)));
    let snapshot = PageSnapshot {
        url: "https://nhentai.net/g/1234/".to_string(),
        title: "Foo".to_string(),
    };
    assert!(!extractor.run(&snapshot));
    assert!(!extractor.run(&snapshot));
}

#[test]
fn test_error_broadcast_moves_loading_popup_to_error() {
    let bus = BrowserBus::new();
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    popup.open();
    assert_eq!(popup.state(), &PopupState::Loading);

    let error = Message::Error {
        reason: "Native peer unavailable".to_string(),
    };
    popup.apply(&error.to_envelope());
    assert_eq!(
        popup.state(),
        &PopupState::Error(Some("Native peer unavailable".to_string()))
    );
}

#[test]
fn test_echo_for_another_book_is_ignored() {
    let bus = BrowserBus::new();
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    populated(&mut popup, book(7, "Foo", "Reading", false), Some(ext(11, false, false)));

    popup.apply(&Message::ToggleFav { book_id: 8, favorite: true }.to_envelope());
    popup.apply(&Message::ToggleDl { ext_info_id: 12, downloaded: true }.to_envelope());
    popup.apply(&Message::SetLists { book_id: 7, list: "Done".to_string() }.to_envelope());

    let view = popup.view().unwrap();
    assert!(!view.book.favorite);
    assert!(!view.ext.as_ref().unwrap().downloaded);
    assert_eq!(view.book.list, "Done");
}

#[test]
fn test_closed_popup_does_not_block_broadcast() {
    let peer = FakePeer::answering(None, None, None);
    let bus = BrowserBus::new();
    let controller = Controller::new(peer, bus.attach(ContextId::Background), TIMEOUT);
    let open = bus.attach(ContextId::Popup(1));
    let closed = bus.attach(ContextId::Popup(2));
    drop(closed);
    assert!(!bus.is_attached(ContextId::Popup(2)));

    controller.on_mutation_request(MutationRequest::ToggleDownload {
        ext_info_id: 11,
        previous_value: false,
    });
    let received = drain(&open);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, json!({ "extInfoId": 11, "downloaded": true }));
}

#[test]
fn test_lookup_for_another_page_keeps_populated_view() {
    let bus = BrowserBus::new();
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    populated(&mut popup, book(7, "Foo", "Reading", true), None);

    let other_tab = Message::ShowBookInfo {
        cover_url: None,
        book_info: Some(book(8, "Bar", "Plan", false)),
        ext_info: None,
    };
    popup.apply(&other_tab.to_envelope());
    assert_eq!(popup.view().unwrap().book.book_id, 7);

    let unknown_page = Message::ShowBookInfo {
        cover_url: None,
        book_info: None,
        ext_info: None,
    };
    popup.apply(&unknown_page.to_envelope());
    assert_eq!(popup.view().unwrap().book.book_id, 7);

    let refreshed = Message::ShowBookInfo {
        cover_url: Some("cover.jpg".to_string()),
        book_info: Some(book(7, "Foo", "Done", true)),
        ext_info: None,
    };
    popup.apply(&refreshed.to_envelope());
    let view = popup.view().unwrap();
    assert_eq!(view.book.list, "Done");
    assert_eq!(view.cover_url.as_deref(), Some("cover.jpg"));
}

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use mangadb_bridge::config::{get_mangadb_dir, load_config};
use mangadb_bridge::logging::setup_logging;
use mangadb_bridge::{
    BridgeError, BrowserBus, ContextId, Controller, NativePort, PageExtractor, PageSnapshot,
    PopupPresenter, PopupState,
};

#[derive(Parser)]
#[command(name = "mangadb-bridge")]
#[command(about = "Drive the MangaDB extension bridge against the native companion")]
struct Cli {
    /// Native peer executable, overriding `peer_command` from bridge.toml
    #[arg(long)]
    peer: Option<String>,

    /// URL of the book page
    #[arg(long)]
    url: String,

    /// Title text as rendered on the book page
    #[arg(long)]
    title: String,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand)]
enum Action {
    /// Flip the favorite flag of the looked-up book
    ToggleFav,
    /// Flip the downloaded flag of the matched external listing
    ToggleDl,
    /// Move the looked-up book to another list
    SetList {
        #[arg(long)]
        list: String,
    },
}

fn run(cli: Cli) -> Result<(), BridgeError> {
    let config = load_config()?;
    setup_logging(&get_mangadb_dir()?.join("bridge-log"), config.log_level());

    let program = cli
        .peer
        .clone()
        .unwrap_or_else(|| config.peer_command().to_string());
    let port = NativePort::spawn(&program, &config.peer_args)?;

    let bus = BrowserBus::new();
    let controller = Controller::new(
        Arc::new(port),
        bus.attach(ContextId::Background),
        config.timeout(),
    );
    let controller_thread = controller.start();

    let wait = config.timeout() + Duration::from_secs(1);
    let mut popup = PopupPresenter::new(bus.attach(ContextId::Popup(1)));
    popup.open();

    let page = PageExtractor::new(bus.attach(ContextId::Tab(1)));
    page.run(&PageSnapshot {
        url: cli.url,
        title: cli.title,
    });
    popup.pump(wait);

    let requested = match cli.action {
        None => None,
        Some(Action::ToggleFav) => Some(popup.toggle_favorite()),
        Some(Action::ToggleDl) => Some(popup.toggle_download()),
        Some(Action::SetList { list }) => Some(popup.set_list(&list)),
    };
    match requested {
        Some(Some(req)) => {
            log::info!("Sent {:?}", req);
            popup.pump(wait);
        }
        Some(None) => eprintln!("Nothing to change for this page"),
        None => {}
    }

    match popup.state() {
        PopupState::Populated(view) => println!("{}", view),
        PopupState::Error(None) => println!("Book is not in the database"),
        PopupState::Error(Some(reason)) => println!("Error: {}", reason),
        PopupState::Empty | PopupState::Loading => println!("No answer from the bridge"),
    }

    controller.shutdown();
    if controller_thread.join().is_err() {
        log::error!("Controller thread panicked");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("mangadb-bridge: {}", e);
        std::process::exit(1);
    }
}

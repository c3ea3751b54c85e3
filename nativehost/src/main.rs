use clap::Parser;
use native_messaging::{install, remove, Scope};
use std::fs;
use std::io;
use std::path::PathBuf;

mod extra_browsers;

use mangadb_bridge::config::get_mangadb_dir;
use mangadb_bridge::logging::setup_logging;
use mangadb_nativehost::{serve, Catalog, HostConfig, HostError};

const NATIVE_HOST_NAME: &str = "mangadb";
const NATIVE_HOST_DESCRIPTION: &str = "MangaDB companion for the MangaDB browser extension";
const FIREFOX_EXTENSION_ID: &str = "mangadb@nilfoer.github.io";
const CHROME_EXTENSION_ORIGIN: &str = "chrome-extension://gbmkphnbclmnaifhcjbkpkjjenkfbkad/";

const ALL_BROWSERS: &[&str] = &[
    "chrome",
    "edge",
    "chromium",
    "brave",
    "vivaldi",
    "firefox",
    "librewolf",
];

#[derive(Parser)]
#[command(name = "mangadb-nativehost")]
#[command(about = "Native messaging host serving the MangaDB catalog to the browser extension")]
struct Cli {
    /// Install native messaging manifests for all detected browsers
    #[arg(long)]
    install: bool,

    /// Remove native messaging manifests for all browsers
    #[arg(long)]
    uninstall: bool,

    /// Catalog file, overriding `library` from the config
    #[arg(long)]
    library: Option<PathBuf>,

    /// Caller origin and manifest path passed in by the browser
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    caller: Vec<String>,
}

fn mangadb_dir() -> Result<PathBuf, HostError> {
    get_mangadb_dir().map_err(|e| HostError::Config(e.to_string()))
}

fn load_config() -> Result<HostConfig, HostError> {
    let path = mangadb_dir()?.join(".config");
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| HostError::Config(format!("Invalid config: {}", e)))
}

fn library_path(cli: &Cli, config: &HostConfig) -> Result<PathBuf, HostError> {
    match cli.library.as_ref().or(config.library.as_ref()) {
        Some(path) => Ok(path.clone()),
        None => Ok(mangadb_dir()?.join("library.toml")),
    }
}

fn run_host(cli: &Cli) -> Result<(), HostError> {
    let config = load_config()?;
    setup_logging(&mangadb_dir()?.join("host-log"), config.log_level());

    let library = library_path(cli, &config)?;
    let mut catalog = Catalog::load(&library)?;
    if !cli.caller.is_empty() {
        log::debug!("Launched by {:?}", cli.caller);
    }
    log::info!(
        "MangaDB host started with {} book(s) from {:?}",
        catalog.books.len(),
        library
    );

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdin_lock = stdin.lock();
    let mut stdout_lock = stdout.lock();
    serve(&mut stdin_lock, &mut stdout_lock, &mut catalog, &config, &library)?;
    log::info!("MangaDB host shutting down");
    Ok(())
}

fn do_install() -> io::Result<()> {
    let exe_path = std::env::current_exe()?;
    println!("Installing native messaging manifests for MangaDB...");
    println!("Binary path: {}", exe_path.display());

    install(
        NATIVE_HOST_NAME,
        NATIVE_HOST_DESCRIPTION,
        &exe_path,
        &[CHROME_EXTENSION_ORIGIN.to_string()],
        &[FIREFOX_EXTENSION_ID.to_string()],
        ALL_BROWSERS,
        Scope::User,
    )?;

    for path in extra_browsers::install_extra(NATIVE_HOST_NAME)? {
        println!("  Copied manifest to {}", path.display());
    }

    println!("Native messaging manifests installed for all supported browsers.");
    Ok(())
}

fn do_uninstall() -> io::Result<()> {
    println!("Removing native messaging manifests for MangaDB...");
    remove(NATIVE_HOST_NAME, ALL_BROWSERS, Scope::User)?;
    for path in extra_browsers::uninstall_extra(NATIVE_HOST_NAME)? {
        println!("  Removed {}", path.display());
    }
    println!("Native messaging manifests removed.");
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.install {
        if let Err(e) = do_install() {
            eprintln!("Install failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if cli.uninstall {
        if let Err(e) = do_uninstall() {
            eprintln!("Uninstall failed: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if let Err(e) = run_host(&cli) {
        log::error!("MangaDB host failed: {}", e);
        eprintln!("mangadb-nativehost: {}", e);
        std::process::exit(1);
    }
}

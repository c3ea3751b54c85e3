pub mod catalog;
pub mod sites;

use mangadb_bridge::envelope::{
    DownloadedConfirm, FavoriteConfirm, ListConfirm, KIND_GET_BOOK_INFO,
};
use mangadb_bridge::{BridgeError, NativeCall, NativeFrame, NativeReply};
use native_messaging::host::{self, NmError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub use catalog::Catalog;

pub const DEFAULT_WEB_GUI_BASE: &str = "http://127.0.0.1:5000";

#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Native messaging error: {0}")]
    NativeMessaging(String),
    #[error("Bad request: {0}")]
    BadRequest(#[from] BridgeError),
    #[error("Site not supported!")]
    UnsupportedSite,
    #[error("No book with id {0}")]
    UnknownBook(i64),
    #[error("No external info with id {0}")]
    UnknownExtInfo(i64),
    #[error("{0}")]
    Rejected(String),
}

impl From<NmError> for HostError {
    fn from(e: NmError) -> Self {
        HostError::NativeMessaging(e.to_string())
    }
}

/// `~/.mangadb/.config`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    pub library: Option<PathBuf>,
    pub web_gui_base: Option<String>,
    pub log_level: Option<String>,
}

impl HostConfig {
    pub fn web_gui_base(&self) -> &str {
        self.web_gui_base.as_deref().unwrap_or(DEFAULT_WEB_GUI_BASE)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .as_deref()
            .and_then(|level| log::LevelFilter::from_str(level).ok())
            .unwrap_or(log::LevelFilter::Info)
    }
}

/// Result of handling one frame: the reply, and whether the catalog changed.
pub struct Handled {
    pub reply: NativeReply,
    pub dirty: bool,
}

pub fn handle_frame(catalog: &mut Catalog, config: &HostConfig, frame: &NativeFrame) -> Handled {
    log::info!("Received {} request #{}", frame.envelope.kind, frame.id);
    match handle_call(catalog, config, frame) {
        Ok((payload, dirty)) => Handled {
            reply: NativeReply::ok(frame.id, payload),
            dirty,
        },
        Err(e) => {
            log::error!("Request #{} failed: {}", frame.id, e);
            Handled {
                reply: NativeReply::failed(frame.id, e.to_string()),
                dirty: false,
            }
        }
    }
}

fn handle_call(
    catalog: &mut Catalog,
    config: &HostConfig,
    frame: &NativeFrame,
) -> Result<(Value, bool), HostError> {
    let call = NativeCall::from_envelope(&frame.envelope)?;
    let result = match call {
        NativeCall::GetBookInfo { book_ref } => {
            let reply = catalog.lookup(&book_ref, config.web_gui_base())?;
            (serde_json::to_value(reply)?, false)
        }
        NativeCall::ToggleDl {
            ext_info_id,
            downloaded,
            previous,
        } => {
            let downloaded = catalog.toggle_downloaded(ext_info_id, downloaded, previous)?;
            (serde_json::to_value(DownloadedConfirm { downloaded })?, true)
        }
        NativeCall::ToggleFav {
            book_id,
            favorite,
            previous,
        } => {
            let favorite = catalog.toggle_favorite(book_id, favorite, previous)?;
            (serde_json::to_value(FavoriteConfirm { favorite })?, true)
        }
        NativeCall::SetLists { book_id, list } => {
            let list = catalog.set_list(book_id, &list)?;
            (serde_json::to_value(ListConfirm { list })?, true)
        }
    };
    Ok(result)
}

/// Handles one frame and persists the catalog if it changed. A change that
/// cannot be written is undone and answered with `success=false`, so the
/// bridge rolls the popup back.
pub fn serve_frame(
    catalog: &mut Catalog,
    config: &HostConfig,
    library: &Path,
    frame: &NativeFrame,
) -> NativeReply {
    let snapshot = (frame.envelope.kind != KIND_GET_BOOK_INFO).then(|| catalog.clone());
    let handled = handle_frame(catalog, config, frame);
    if !handled.dirty {
        return handled.reply;
    }
    match catalog.save(library) {
        Ok(()) => handled.reply,
        Err(e) => {
            log::error!("Failed to save catalog to {:?}: {}", library, e);
            if let Some(snapshot) = snapshot {
                *catalog = snapshot;
            }
            NativeReply::failed(frame.id, e.to_string())
        }
    }
}

fn read_native_message<R: Read>(reader: &mut R) -> Result<Option<NativeFrame>, HostError> {
    match host::decode_message_opt(reader, host::MAX_FROM_BROWSER) {
        Ok(Some(json_str)) => Ok(Some(serde_json::from_str(&json_str)?)),
        Ok(None) => Ok(None),
        Err(NmError::Disconnected) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_native_message<W: Write>(writer: &mut W, reply: &NativeReply) -> Result<(), HostError> {
    host::send_json(writer, reply)?;
    Ok(())
}

/// Answers frames from `reader` on `writer` until the bridge hangs up.
pub fn serve<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    catalog: &mut Catalog,
    config: &HostConfig,
    library: &Path,
) -> Result<(), HostError> {
    loop {
        let frame = match read_native_message(reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(HostError::Json(e)) => {
                // Without an id the bridge cannot route a reply; it times out.
                log::error!("Malformed frame: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let reply = serve_frame(catalog, config, library, &frame);
        if let Err(e) = write_native_message(writer, &reply) {
            log::error!("Failed to write response: {}", e);
        }
    }
}

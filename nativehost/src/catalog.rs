//! The book catalog the host answers from: a TOML file with `[[book]]` and
//! `[[ext_info]]` tables.

use chrono::{Local, NaiveDate};
use mangadb_bridge::{BookInfo, BookRef, Censorship, ExtInfo, LookupReply};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::sites::{split_title, Site, SiteRef};
use crate::HostError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: i64,
    pub title_eng: Option<String>,
    pub title_foreign: Option<String>,
    pub list: String,
    pub last_change: NaiveDate,
    #[serde(default)]
    pub favorite: bool,
}

impl BookRecord {
    pub fn title(&self) -> String {
        match (&self.title_eng, &self.title_foreign) {
            (Some(eng), Some(foreign)) => format!("{} / {}", eng, foreign),
            (Some(title), None) | (None, Some(title)) => title.clone(),
            (None, None) => String::new(),
        }
    }

    fn matches_title(&self, eng: &str, foreign: Option<&str>) -> bool {
        let same = |a: &Option<String>, b: &str| {
            a.as_deref()
                .is_some_and(|a| !b.is_empty() && a.eq_ignore_ascii_case(b))
        };
        same(&self.title_eng, eng)
            || same(&self.title_foreign, eng)
            || foreign.is_some_and(|f| same(&self.title_foreign, f))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtRecord {
    pub id: i64,
    pub book_id: i64,
    pub site: Site,
    pub id_onpage: String,
    pub uploader: String,
    pub upload_date: NaiveDate,
    #[serde(default)]
    pub censorship: Censorship,
    #[serde(default)]
    pub downloaded: bool,
    pub last_update: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default, rename = "book")]
    pub books: Vec<BookRecord>,
    #[serde(default, rename = "ext_info")]
    pub ext_infos: Vec<ExtRecord>,
}

impl Catalog {
    pub fn from_toml(content: &str) -> Result<Self, HostError> {
        toml::from_str(content).map_err(|e| HostError::Config(format!("Invalid catalog: {}", e)))
    }

    /// Reads the catalog at `path`; a missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self, HostError> {
        if !path.exists() {
            log::warn!("No catalog at {:?}, starting empty", path);
            return Ok(Catalog::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(self)
            .map_err(|e| HostError::Config(format!("Failed to serialize: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn find_book(&self, title: &str) -> Option<&BookRecord> {
        let (eng, foreign) = split_title(title);
        self.books
            .iter()
            .find(|b| b.matches_title(&eng, foreign.as_deref()))
    }

    /// Answers `get_book_info` for a page.
    pub fn lookup(&self, book_ref: &BookRef, web_gui_base: &str) -> Result<LookupReply, HostError> {
        let site_ref = SiteRef::from_url(&book_ref.url).ok_or(HostError::UnsupportedSite)?;

        let book = match self.find_book(&book_ref.title) {
            Some(book) => book,
            None => {
                log::info!("Book {:?} not in catalog", book_ref.title);
                return Ok(LookupReply(Some(book_ref.url.clone()), None, None));
            }
        };

        let listings: Vec<&ExtRecord> = self
            .ext_infos
            .iter()
            .filter(|ei| ei.book_id == book.id && ei.site == site_ref.site)
            .collect();
        let multiple_ei = listings.len() > 1;
        let ext_info = listings
            .iter()
            .find(|ei| ei.id_onpage == site_ref.id_onpage)
            .or_else(|| if multiple_ei { listings.first() } else { None })
            .map(|ei| ExtInfo {
                ext_info_id: ei.id,
                uploader: ei.uploader.clone(),
                upload_date: ei.upload_date,
                censorship: ei.censorship,
                downloaded: ei.downloaded,
                last_update: ei.last_update,
                multiple_ei,
            });

        let book_info = BookInfo {
            book_id: book.id,
            title: book.title(),
            list: book.list.clone(),
            last_change: book.last_change,
            favorite: book.favorite,
            web_gui_url: format!("{}/book/{}", web_gui_base.trim_end_matches('/'), book.id),
        };

        Ok(LookupReply(site_ref.cover_url(), Some(book_info), ext_info))
    }

    fn book_mut(&mut self, book_id: i64) -> Result<&mut BookRecord, HostError> {
        self.books
            .iter_mut()
            .find(|b| b.id == book_id)
            .ok_or(HostError::UnknownBook(book_id))
    }

    /// Stores `favorite` if the flag still reads `previous`; a toggle made
    /// against a value that has changed since flips the stored flag.
    pub fn toggle_favorite(
        &mut self,
        book_id: i64,
        favorite: bool,
        previous: bool,
    ) -> Result<bool, HostError> {
        let book = self.book_mut(book_id)?;
        book.favorite = toggled(book.favorite, favorite, previous);
        book.last_change = today();
        Ok(book.favorite)
    }

    pub fn set_list(&mut self, book_id: i64, list: &str) -> Result<String, HostError> {
        let list = list.trim();
        if list.is_empty() {
            return Err(HostError::Rejected("List name must not be empty".to_string()));
        }
        let book = self.book_mut(book_id)?;
        book.list = list.to_string();
        book.last_change = today();
        Ok(book.list.clone())
    }

    pub fn toggle_downloaded(
        &mut self,
        ext_info_id: i64,
        downloaded: bool,
        previous: bool,
    ) -> Result<bool, HostError> {
        let ei = self
            .ext_infos
            .iter_mut()
            .find(|ei| ei.id == ext_info_id)
            .ok_or(HostError::UnknownExtInfo(ext_info_id))?;
        ei.downloaded = toggled(ei.downloaded, downloaded, previous);
        Ok(ei.downloaded)
    }
}

fn toggled(stored: bool, wanted: bool, previous: bool) -> bool {
    if stored == previous {
        wanted
    } else {
        log::info!("Flag changed since the popup read it, flipping the stored value");
        !stored
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

//! Recognizes the book sites the catalog imports from.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Tsumino,
    Nhentai,
    Mangadex,
    Manganelo,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Site::Tsumino => "tsumino.com",
            Site::Nhentai => "nhentai.net",
            Site::Mangadex => "MangaDex",
            Site::Manganelo => "Manganelo",
        };
        f.write_str(name)
    }
}

/// A listing on a supported site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRef {
    pub site: Site,
    pub id_onpage: String,
}

struct Pattern {
    site: Site,
    regex: Regex,
}

fn patterns() -> &'static [Pattern] {
    static PATTERNS: OnceLock<Vec<Pattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                Site::Tsumino,
                r"^(?:https?://)?(?:www\.)?tsumino\.com/(?:Book|Read|Download)/(?:Info|View|Index)/(\d+)",
            ),
            (Site::Nhentai, r"^(?:https?://)?(?:www\.)?nhentai\.net/g/(\d+)/?"),
            (
                Site::Mangadex,
                r"^(?:https?://)?(?:www\.)?mangadex\.(?:org|cc)/title/(\d+)",
            ),
            (
                Site::Manganelo,
                r"^(?:https?://)?(?:m\.|chap\.)?manganelo\.com/manga-([a-z]{2}\d+)",
            ),
        ]
        .into_iter()
        .filter_map(|(site, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(Pattern { site, regex }),
            Err(e) => {
                log::error!("Bad URL pattern for {}: {}", site, e);
                None
            }
        })
        .collect()
    })
}

impl SiteRef {
    pub fn from_url(url: &str) -> Option<Self> {
        patterns().iter().find_map(|p| {
            p.regex.captures(url.trim()).map(|caps| SiteRef {
                site: p.site,
                id_onpage: caps[1].to_string(),
            })
        })
    }

    /// Cover image for sites where it can be derived from the id alone.
    pub fn cover_url(&self) -> Option<String> {
        match self.site {
            Site::Tsumino => Some(format!(
                "https://www.tsumino.com/Image/Thumb/{}",
                self.id_onpage
            )),
            Site::Mangadex => Some(format!(
                "https://mangadex.org/images/manga/{}.jpg",
                self.id_onpage
            )),
            Site::Nhentai | Site::Manganelo => None,
        }
    }
}

/// Splits a page title of the form `"English / Foreign"`.
pub fn split_title(title: &str) -> (String, Option<String>) {
    match title.split_once(" / ") {
        Some((eng, foreign)) if !foreign.trim().is_empty() => {
            (eng.trim().to_string(), Some(foreign.trim().to_string()))
        }
        Some((eng, _)) => (eng.trim().to_string(), None),
        None => (title.trim().to_string(), None),
    }
}

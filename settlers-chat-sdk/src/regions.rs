//! Region and realm lookup table.
//!
//! The table is a plain value: build it once with [`RegionTable::embedded`]
//! (the bundled `regions.toml`) or [`RegionTable::from_toml_str`] and hand it
//! to the client builder. Nothing here is global, so tests can use their own
//! tables pointing at local addresses.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

const EMBEDDED_TABLE: &str = include_str!("regions.toml");
const DEFAULT_SITE: &str = "thesettlersonline.";

/// A group of servers under a single web domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    Argentina,
    Brazil,
    Chile,
    Colombia,
    CostaRica,
    CzechRepublic,
    Ecuador,
    Europe,
    France,
    Germany,
    Greece,
    Italy,
    LatinAmerica,
    Mexico,
    Netherlands,
    Peru,
    Poland,
    Romania,
    Russia,
    Spain,
    Usa,
    Uruguay,
    Venezuela,
    Tsotesting,
}

impl Region {
    pub const ALL: [Region; 24] = [
        Region::Argentina,
        Region::Brazil,
        Region::Chile,
        Region::Colombia,
        Region::CostaRica,
        Region::CzechRepublic,
        Region::Ecuador,
        Region::Europe,
        Region::France,
        Region::Germany,
        Region::Greece,
        Region::Italy,
        Region::LatinAmerica,
        Region::Mexico,
        Region::Netherlands,
        Region::Peru,
        Region::Poland,
        Region::Romania,
        Region::Russia,
        Region::Spain,
        Region::Usa,
        Region::Uruguay,
        Region::Venezuela,
        Region::Tsotesting,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Region::Argentina => "ARGENTINA",
            Region::Brazil => "BRAZIL",
            Region::Chile => "CHILE",
            Region::Colombia => "COLOMBIA",
            Region::CostaRica => "COSTA_RICA",
            Region::CzechRepublic => "CZECH_REPUBLIC",
            Region::Ecuador => "ECUADOR",
            Region::Europe => "EUROPE",
            Region::France => "FRANCE",
            Region::Germany => "GERMANY",
            Region::Greece => "GREECE",
            Region::Italy => "ITALY",
            Region::LatinAmerica => "LATIN_AMERICA",
            Region::Mexico => "MEXICO",
            Region::Netherlands => "NETHERLANDS",
            Region::Peru => "PERU",
            Region::Poland => "POLAND",
            Region::Romania => "ROMANIA",
            Region::Russia => "RUSSIA",
            Region::Spain => "SPAIN",
            Region::Usa => "USA",
            Region::Uruguay => "URUGUAY",
            Region::Venezuela => "VENEZUELA",
            Region::Tsotesting => "TSOTESTING",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown region {0:?}")]
pub struct UnknownRegionName(pub String);

impl FromStr for Region {
    type Err = UnknownRegionName;

    /// Accepts `RUSSIA`, `russia`, `costa-rica`, `Costa Rica`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        Region::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| UnknownRegionName(s.to_string()))
    }
}

/// One realm entry as written in the table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RealmEntry {
    pub no: String,
    pub bb: String,
    pub chat: String,
}

/// Everything the handshake needs to know about a region.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionInfo {
    pub name: Region,
    #[serde(default = "default_site")]
    pub site: String,
    pub domain: String,
    pub language: String,
    pub main_page: String,
    #[serde(rename = "realm", default)]
    pub realms: Vec<RealmEntry>,
}

fn default_site() -> String {
    DEFAULT_SITE.to_string()
}

/// Fully expanded addresses of one realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmEndpoints {
    pub no: String,
    /// Where the web auth token is exchanged for a chat token.
    pub auth_url: String,
    /// BOSH binding endpoint.
    pub bind_url: String,
    /// XMPP domain used in JIDs and `to` attributes.
    pub chat_host: String,
}

impl RegionInfo {
    /// `www.<site><domain>`
    pub fn site_host(&self) -> String {
        format!("www.{}{}", self.site, self.domain)
    }

    pub fn site_https(&self) -> String {
        format!("https://{}", self.site_host())
    }

    pub fn main_page_url(&self) -> String {
        format!("{}/{}/{}", self.site_https(), self.language, self.main_page)
    }

    /// Web login URL with the credentials percent-encoded into the query.
    pub fn login_url(&self, email: &str, password: &str) -> String {
        format!(
            "{}/{}//api/user/login?name={}&password={}&rememberUser=on",
            self.site_https(),
            self.language,
            utf8_percent_encode(email, NON_ALPHANUMERIC),
            utf8_percent_encode(password, NON_ALPHANUMERIC),
        )
    }

    fn expand(&self, entry: &RealmEntry) -> RealmEndpoints {
        let chat_host = format!("{}.{}{}", entry.chat, self.site, self.domain);
        RealmEndpoints {
            no: entry.no.clone(),
            auth_url: format!("http://{}.{}{}/authenticate", entry.bb, self.site, self.domain),
            bind_url: format!("http://{chat_host}/http-bind/"),
            chat_host,
        }
    }

    /// All realms, in table order.
    pub fn realms(&self) -> impl Iterator<Item = RealmEndpoints> + '_ {
        self.realms.iter().map(|entry| self.expand(entry))
    }

    pub fn realm(&self, no: &str) -> Option<RealmEndpoints> {
        self.realms
            .iter()
            .find(|entry| entry.no == no)
            .map(|entry| self.expand(entry))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegionTableError {
    #[error("can't read region table: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad region table: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("region {0} is listed twice")]
    Duplicate(Region),
}

#[derive(Deserialize)]
struct RawTable {
    #[serde(rename = "region", default)]
    regions: Vec<RegionInfo>,
}

/// Read-only region lookup, built once and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: HashMap<Region, RegionInfo>,
}

impl RegionTable {
    /// The table bundled with the crate.
    pub fn embedded() -> Result<Self, RegionTableError> {
        Self::from_toml_str(EMBEDDED_TABLE)
    }

    pub fn from_path(path: &Path) -> Result<Self, RegionTableError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, RegionTableError> {
        let raw: RawTable = toml::from_str(s)?;
        let mut regions = HashMap::with_capacity(raw.regions.len());
        for info in raw.regions {
            let name = info.name;
            if regions.insert(name, info).is_some() {
                return Err(RegionTableError::Duplicate(name));
            }
        }
        Ok(Self { regions })
    }

    /// Build a table directly from entries (handy for tests and custom deployments).
    pub fn from_regions(infos: impl IntoIterator<Item = RegionInfo>) -> Self {
        Self {
            regions: infos.into_iter().map(|info| (info.name, info)).collect(),
        }
    }

    pub fn get(&self, region: Region) -> Option<&RegionInfo> {
        self.regions.get(&region)
    }

    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        self.regions.keys().copied()
    }
}

//! Mod folder listings and the changes announced for them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A watched folder of `.jar` mods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModFolder {
    Both,
    ClientOnly,
    ServerOnly,
    BothOptional,
    ClientOptional,
    /// The server's own mods folder.
    Server,
}

impl ModFolder {
    /// Sub-folders of the hoster's branch, in check order.
    pub const HOSTER: [ModFolder; 5] = [
        ModFolder::Both,
        ModFolder::ClientOnly,
        ModFolder::ServerOnly,
        ModFolder::BothOptional,
        ModFolder::ClientOptional,
    ];

    /// Location below the configured root.
    pub fn relative_path(self) -> &'static str {
        match self {
            ModFolder::Both => "both",
            ModFolder::ClientOnly => "client_only",
            ModFolder::ServerOnly => "server_only",
            ModFolder::BothOptional => "both/optional",
            ModFolder::ClientOptional => "client_only/optional",
            ModFolder::Server => "",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ModFolder::Both => "Hoster's both",
            ModFolder::ClientOnly => "Hoster's client",
            ModFolder::ServerOnly => "Hoster's server",
            ModFolder::BothOptional => "Hoster's optional both",
            ModFolder::ClientOptional => "Hoster's optional client",
            ModFolder::Server => "Server's",
        }
    }
}

/// Last seen mod names of the hoster's branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HosterMods {
    pub both: BTreeSet<String>,
    pub client_only: BTreeSet<String>,
    pub server_only: BTreeSet<String>,
    pub both_optional: BTreeSet<String>,
    pub client_optional: BTreeSet<String>,
}

impl HosterMods {
    pub fn folder_mut(&mut self, folder: ModFolder) -> Option<&mut BTreeSet<String>> {
        match folder {
            ModFolder::Both => Some(&mut self.both),
            ModFolder::ClientOnly => Some(&mut self.client_only),
            ModFolder::ServerOnly => Some(&mut self.server_only),
            ModFolder::BothOptional => Some(&mut self.both_optional),
            ModFolder::ClientOptional => Some(&mut self.client_optional),
            ModFolder::Server => None,
        }
    }

    /// Hoster mods the server also runs; excluded from the server's own listing.
    pub fn server_side(&self) -> impl Iterator<Item = &String> {
        self.both
            .iter()
            .chain(&self.both_optional)
            .chain(&self.server_only)
    }
}

/// Persisted listing. A section is absent while its folder is not watched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedModNames {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hoster: Option<HosterMods>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<BTreeSet<String>>,
}

/// Mods added to and removed from one folder since the last check. Both lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModChange {
    pub time: i64,
    pub folder: ModFolder,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ModChange {
    /// `None` when both listings hold the same names.
    pub fn between(
        time: i64,
        folder: ModFolder,
        last: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> Option<Self> {
        let added: Vec<String> = current.difference(last).cloned().collect();
        let removed: Vec<String> = last.difference(current).cloned().collect();
        if added.is_empty() && removed.is_empty() {
            return None;
        }
        Some(Self {
            time,
            folder,
            added,
            removed,
        })
    }
}

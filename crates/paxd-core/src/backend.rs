use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Pip,
    Winget,
    Choco,
    Npm,
    Paxd,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Self::Pip,
        Self::Winget,
        Self::Choco,
        Self::Npm,
        Self::Paxd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pip => "pip",
            Self::Winget => "winget",
            Self::Choco => "choco",
            Self::Npm => "npm",
            Self::Paxd => "paxd",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.as_str() == value)
    }

    /// True for the package manager's own backend, whose entries are other
    /// manifests resolved recursively rather than handed to an installer.
    pub fn is_self(self) -> bool {
        self == Self::Paxd
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

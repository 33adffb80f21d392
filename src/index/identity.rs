use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Stable numeric identity of an extension, declared in its metadata header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionId(pub i32);

/// Identity shared by styles and scripts.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i32);

/// Author identity derived from the display name.
///
/// The value is the 31-multiplier string hash over UTF-16 code units, so ids
/// stay identical to indexes already published by earlier generators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub i32);

impl AuthorId {
    pub fn from_name(name: &str) -> Self {
        let hash = name
            .encode_utf16()
            .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(i32::from(unit)));
        AuthorId(hash)
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How an extension is executed.
///
/// Only Lua scripts exist today; `Other` keeps indexes written by newer
/// generators readable.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum ExtensionType {
    #[default]
    LuaScript,
    Other(String),
}

impl ExtensionType {
    pub fn as_str(&self) -> &str {
        match self {
            ExtensionType::LuaScript => "LuaScript",
            ExtensionType::Other(value) => value.as_str(),
        }
    }

    /// File extension (without the dot) used by scripts of this type.
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            ExtensionType::LuaScript => Some("lua"),
            ExtensionType::Other(_) => None,
        }
    }

    /// Resolve the type from a script's file extension.
    pub fn from_file_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "lua" => Some(ExtensionType::LuaScript),
            _ => None,
        }
    }

    fn from_str(value: &str) -> Self {
        match value {
            "LuaScript" => ExtensionType::LuaScript,
            other => ExtensionType::Other(other.to_string()),
        }
    }
}

impl Serialize for ExtensionType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ExtensionType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from_str(&value))
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use anyhow::Context;

/// Token type and modifier names negotiated with a server.
///
/// Types are referenced by index, modifiers by bit position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Legend {
    pub token_types: Vec<String>,
    #[serde(default)]
    pub token_modifiers: Vec<String>,
}

/// A token type resolved against a legend.
///
/// Servers may send indices the client never negotiated; those are kept as
/// `Unknown` instead of failing the whole batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum TokenType {
    Known(u32),
    Unknown(u32),
}

impl TokenType {
    pub fn index(self) -> u32 {
        match self {
            TokenType::Known(i) | TokenType::Unknown(i) => i,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, TokenType::Unknown(_))
    }
}

/// Modifier bitset split into bits the legend names and bits it does not.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ModifierSet {
    pub bits: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub unknown_bits: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl ModifierSet {
    pub fn contains(&self, bit: u32) -> bool {
        bit < 32 && self.bits & (1 << bit) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0 && self.unknown_bits == 0
    }

    /// Re-join known and unknown bits into the wire encoding.
    pub fn encoded(&self) -> u32 {
        self.bits | self.unknown_bits
    }

    /// Known bit positions, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..32).filter(move |b| self.contains(*b))
    }
}

impl Default for Legend {
    fn default() -> Self {
        Self::standard()
    }
}

impl Legend {
    pub fn new(token_types: Vec<String>, token_modifiers: Vec<String>) -> Self {
        Self {
            token_types,
            token_modifiers,
        }
    }

    /// The LSP predefined types and modifiers, in protocol order.
    pub fn standard() -> Self {
        static YAML: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/resources/legend.yml"));
        serde_yaml::from_str(YAML).expect("valid built-in legend yaml")
    }

    pub fn from_yaml_str(s: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(s).context("parse legend yaml")
    }

    /// Load a legend from `.json`, `.yml` or `.yaml`.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read legend: {}", path.display()))?;
        let legend = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("parse legend json: {}", path.display()))?,
            _ => Self::from_yaml_str(&content)
                .with_context(|| format!("load legend: {}", path.display()))?,
        };
        Ok(legend)
    }

    pub fn token_type(&self, index: u32) -> TokenType {
        if (index as usize) < self.token_types.len() {
            TokenType::Known(index)
        } else {
            TokenType::Unknown(index)
        }
    }

    pub fn modifiers(&self, encoded: u32) -> ModifierSet {
        let known_mask = match self.token_modifiers.len() {
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        };
        ModifierSet {
            bits: encoded & known_mask,
            unknown_bits: encoded & !known_mask,
        }
    }

    pub fn type_name(&self, ty: TokenType) -> Option<&str> {
        match ty {
            TokenType::Known(i) => self.token_types.get(i as usize).map(String::as_str),
            TokenType::Unknown(_) => None,
        }
    }

    pub fn modifier_names(&self, mods: ModifierSet) -> Vec<&str> {
        mods.iter()
            .filter_map(|b| self.token_modifiers.get(b as usize).map(String::as_str))
            .collect()
    }
}

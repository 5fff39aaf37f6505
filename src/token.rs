//! Token identifiers: inline symbol keys and ERC-20 addresses.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum symbol length in bytes.
pub const MAX_SYMBOL_LEN: usize = 12;

/// A token symbol stored inline (no heap allocation).
///
/// Symbols are short ASCII tickers like "WETH" or "WBTC". Longer input is
/// truncated to [`MAX_SYMBOL_LEN`] bytes; configuration validation rejects
/// oversized symbols before any `Symbol` is built from untrusted input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    len: u8,
    bytes: [u8; MAX_SYMBOL_LEN],
}

impl Symbol {
    pub fn new(s: &str) -> Self {
        let len = s.len().min(MAX_SYMBOL_LEN);
        let mut bytes = [0u8; MAX_SYMBOL_LEN];
        bytes[..len].copy_from_slice(&s.as_bytes()[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || s.len() > MAX_SYMBOL_LEN {
            return Err(serde::de::Error::custom(format!(
                "symbol '{s}' must be 1..={MAX_SYMBOL_LEN} bytes"
            )));
        }
        Ok(Symbol::new(&s))
    }
}

/// A checksummed-insensitive ERC-20 contract address (`0x` + 40 hex digits).
///
/// Stored lowercase so addresses compare by value regardless of input case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Validate and normalize an address string.
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix("0x")?;
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ERC-20 address '{s}'")))
    }
}

/// A tracked basket asset: symbol plus the on-chain metadata adapters need.
#[derive(Debug, Clone)]
pub struct Token {
    pub symbol: Symbol,
    pub address: Address,
    pub decimals: u8,
    /// Identifier used by the price feed for this token (e.g. a CoinGecko id).
    pub feed_id: String,
}

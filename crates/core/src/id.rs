//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Number of digits in a Document Key.
pub const KEY_LEN: usize = 44;

/// Number of digits in a lot id.
pub const LOT_ID_LEN: usize = 15;

/// 44-digit access key of a fiscal document.
///
/// Layout: `cUF(2) AAMM(4) CNPJ(14) mod(2) serie(3) nNF(9) tpEmis(1) cNF(8) cDV(1)`.
/// The key is derived from document fields, never chosen freely by a caller;
/// parsing only accepts the textual form of an existing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(String);

/// Fields a Document Key is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParts {
    /// IBGE jurisdiction code (`cUF`).
    pub jurisdiction_code: u8,
    /// Emission year and month as `AAMM`.
    pub year_month: String,
    /// Issuer CNPJ (or CPF, left-padded to 14 digits).
    pub issuer_id: String,
    pub model: u8,
    pub series: u16,
    pub number: u32,
    pub emission_type: u8,
    /// Random numeric code (`cNF`).
    pub numeric_code: u32,
}

impl DocumentKey {
    /// Derive the key (including its modulo-11 check digit) from document fields.
    pub fn derive(parts: &KeyParts) -> DomainResult<Self> {
        if !(11..=99).contains(&parts.jurisdiction_code) {
            return Err(DomainError::validation(format!(
                "cUF must have two digits, got {}",
                parts.jurisdiction_code
            )));
        }
        if parts.year_month.len() != 4 || !all_digits(&parts.year_month) {
            return Err(DomainError::validation("AAMM must be four digits"));
        }
        let issuer = only_digits(&parts.issuer_id);
        if issuer.is_empty() || issuer.len() > 14 {
            return Err(DomainError::validation("issuer id must have 1..=14 digits"));
        }
        if parts.model > 99 {
            return Err(DomainError::validation("model must have two digits"));
        }
        if parts.series > 999 {
            return Err(DomainError::validation("series must be within 0..=999"));
        }
        if parts.number == 0 || parts.number > 999_999_999 {
            return Err(DomainError::validation("nNF must be within 1..=999999999"));
        }
        if !(1..=9).contains(&parts.emission_type) {
            return Err(DomainError::validation("tpEmis must be a single digit"));
        }
        if parts.numeric_code > 99_999_999 {
            return Err(DomainError::validation("cNF must have at most eight digits"));
        }

        let body = format!(
            "{:02}{}{:0>14}{:02}{:03}{:09}{}{:08}",
            parts.jurisdiction_code,
            parts.year_month,
            issuer,
            parts.model,
            parts.series,
            parts.number,
            parts.emission_type,
            parts.numeric_code,
        );
        let dv = check_digit(&body);
        Ok(Self(format!("{body}{dv}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the last digit matches the modulo-11 digit of the first 43.
    pub fn has_valid_check_digit(&self) -> bool {
        let (body, dv) = self.0.split_at(KEY_LEN - 1);
        dv == check_digit(body).to_string()
    }
}

/// Modulo-11 check digit with weights 2..=9 applied right to left.
pub fn check_digit(body: &str) -> u8 {
    let sum: u32 = body
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * (2 + (i as u32 % 8)))
        .sum();
    let rest = sum % 11;
    if rest < 2 { 0 } else { (11 - rest) as u8 }
}

impl core::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocumentKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != KEY_LEN || !all_digits(s) {
            return Err(DomainError::invalid_id(format!(
                "DocumentKey: expected {KEY_LEN} digits, got {:?}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DocumentKey> for String {
    fn from(value: DocumentKey) -> Self {
        value.0
    }
}

/// Lot (transmission envelope) identifier: 15 numeric digits, zero-padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(String);

impl LotId {
    /// Fresh, uniformly random lot id. Lot ids are never reused.
    pub fn generate() -> Self {
        let n: u64 = rand::thread_rng().gen_range(1..=999_999_999_999_999);
        Self(format!("{n:015}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LotId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != LOT_ID_LEN || !all_digits(s) {
            return Err(DomainError::invalid_id(format!(
                "LotId: expected {LOT_ID_LEN} digits, got {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

/// Identifier of one batch submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered) so batch reports sort by submission time.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(BatchId, "BatchId");

/// Strip everything that is not an ASCII digit.
pub fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> KeyParts {
        KeyParts {
            jurisdiction_code: 29,
            year_month: "2501".to_string(),
            issuer_id: "41.986.662/0001-60".to_string(),
            model: 55,
            series: 1,
            number: 123,
            emission_type: 1,
            numeric_code: 12_345_678,
        }
    }

    #[test]
    fn derive_produces_44_digits_with_layout() {
        let key = DocumentKey::derive(&parts()).unwrap();
        assert_eq!(key.as_str().len(), KEY_LEN);
        let k = key.as_str();
        assert_eq!(&k[0..2], "29");
        assert_eq!(&k[6..20], "41986662000160");
        assert_eq!(&k[20..22], "55");
        assert_eq!(&k[22..25], "001");
        assert_eq!(&k[25..34], "000000123");
        assert!(key.has_valid_check_digit());
    }

    #[test]
    fn derive_is_bit_exact() {
        let key = DocumentKey::derive(&parts()).unwrap();
        assert_eq!(key.as_str(), "29250141986662000160550010000001231123456781");
    }

    #[test]
    fn check_digit_low_remainders_map_to_zero() {
        assert_eq!(check_digit("3518051111111111111155001000000001100000001"), 2);
        assert_eq!(check_digit("0"), 0);
    }

    #[test]
    fn derive_changes_with_numeric_code() {
        let a = DocumentKey::derive(&parts()).unwrap();
        let mut p = parts();
        p.numeric_code = 87_654_321;
        let b = DocumentKey::derive(&p).unwrap();
        assert_ne!(a, b);
        assert_eq!(&a.as_str()[25..34], &b.as_str()[25..34]);
    }

    #[test]
    fn derive_rejects_zero_number() {
        let mut p = parts();
        p.number = 0;
        assert!(DocumentKey::derive(&p).is_err());
    }

    #[test]
    fn parse_requires_exactly_44_digits() {
        assert!("1".repeat(44).parse::<DocumentKey>().is_ok());
        assert!("1".repeat(43).parse::<DocumentKey>().is_err());
        assert!("1".repeat(45).parse::<DocumentKey>().is_err());
        assert!(format!("{}a", "1".repeat(43)).parse::<DocumentKey>().is_err());
    }

    #[test]
    fn key_serializes_as_plain_string() {
        let key: DocumentKey = "2".repeat(44).parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", "2".repeat(44)));
        let bad: Result<DocumentKey, _> = serde_json::from_str("\"123\"");
        assert!(bad.is_err());
    }

    #[test]
    fn lot_ids_are_15_digits_and_fresh() {
        let a = LotId::generate();
        let b = LotId::generate();
        assert_eq!(a.as_str().len(), LOT_ID_LEN);
        assert!(a.as_str().bytes().all(|c| c.is_ascii_digit()));
        assert_ne!(a, b);
        assert!(a.as_str().parse::<LotId>().is_ok());
    }
}

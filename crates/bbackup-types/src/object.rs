use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier assigned by the store to an uploaded file or directory.
///
/// IDs are allocated by the store and never reused for a different object
/// in the same account. Zero means "no object".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(i64);

impl ObjectId {
    /// The store's root directory. Location directories live directly below it.
    pub const ROOT_DIRECTORY: ObjectId = ObjectId(1);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The null object ID.
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns `true` if this is the null object ID.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw 64-bit value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Parse an ID written either as `0x`-prefixed hex or as decimal.
    ///
    /// Hex is read as the 64-bit pattern [`Display`](fmt::Display) prints,
    /// so negative IDs survive a round trip through text.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map(|bits| bits as i64),
            None => s.parse::<i64>(),
        };
        parsed
            .map(Self)
            .map_err(|e| TypeError::InvalidObjectId(format!("{s}: {e}")))
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0 as u64)
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i64> for ObjectId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<ObjectId> for i64 {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_zero() {
        assert!(ObjectId::null().is_null());
        assert!(!ObjectId::ROOT_DIRECTORY.is_null());
        assert_eq!(ObjectId::null().get(), 0);
    }

    #[test]
    fn display_is_prefixed_hex() {
        assert_eq!(ObjectId::new(1001).to_string(), "0x3e9");
        assert_eq!(ObjectId::ROOT_DIRECTORY.to_string(), "0x1");
    }

    #[test]
    fn parse_hex_and_decimal() {
        assert_eq!(ObjectId::parse("0x3e9").unwrap(), ObjectId::new(1001));
        assert_eq!(ObjectId::parse("0X3E9").unwrap(), ObjectId::new(1001));
        assert_eq!(ObjectId::parse("1001").unwrap(), ObjectId::new(1001));
        assert_eq!(" 5 ".parse::<ObjectId>().unwrap(), ObjectId::new(5));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            ObjectId::parse("0xzz"),
            Err(TypeError::InvalidObjectId(_))
        ));
        assert!(ObjectId::parse("").is_err());
    }

    #[test]
    fn negative_id_uses_bit_pattern() {
        let id = ObjectId::new(-1);
        assert_eq!(id.to_string(), "0xffffffffffffffff");
        assert_eq!(ObjectId::parse("0xffffffffffffffff").unwrap(), id);
        assert_eq!(ObjectId::parse("-1").unwrap(), id);
        assert_eq!(
            ObjectId::new(i64::MIN).to_string(),
            "0x8000000000000000"
        );
    }

    #[test]
    fn parse_rejects_hex_wider_than_64_bits() {
        assert!(ObjectId::parse("0x10000000000000000").is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let id = ObjectId::new(0x1234);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "4660");
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    // -----------------------------------------------------------------------
    // Property tests
    // -----------------------------------------------------------------------

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_parse_round_trip(raw in any::<i64>()) {
                let id = ObjectId::new(raw);
                prop_assert_eq!(ObjectId::parse(&id.to_string()).unwrap(), id);
                prop_assert_eq!(format!("{id:?}"), format!("ObjectId({id})"));
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($name:ident, $repr:ty) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }
    };
}

// Store-assigned user identity. Also the `client_id` seen on the wire.
numeric_id!(UserId, i64);
// Store-assigned message row id, increasing with insert order.
numeric_id!(MessageId, i64);
// Process-local handle for one live channel. Several may share a `UserId`.
numeric_id!(ConnectionId, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_bare_number() {
        assert_eq!(UserId::new(42).to_string(), "42");
        assert_eq!(ConnectionId::new(7).to_string(), "7");
    }

    #[test]
    fn parse_from_path_segment() {
        let id: UserId = "17".parse().unwrap();
        assert_eq!(id.get(), 17);
        assert!("seventeen".parse::<UserId>().is_err());
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&MessageId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: MessageId = serde_json::from_str("3").unwrap();
        assert_eq!(back, MessageId::new(3));
    }

    #[test]
    fn ordering_follows_raw_value() {
        assert!(MessageId::new(1) < MessageId::new(2));
        assert!(ConnectionId::new(10) > ConnectionId::new(9));
    }
}

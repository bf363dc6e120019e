use crate::error::{CoreError, CoreResult};
use dmcp_ipc::RawMessage;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Platform-assigned id. Strictly increasing within a channel, so it is
/// the ordering key for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(u64);

impl Snowflake {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Parses a user-supplied id, naming the field in the error.
    pub fn parse_field(field: &str, value: &str) -> CoreResult<Self> {
        value.trim().parse::<u64>().map(Self).map_err(|_| {
            CoreError::invalid_argument(format!(
                "{} must be a numeric id, got '{}'",
                field, value
            ))
        })
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for Snowflake {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_field("id", s)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Serialized as a decimal string: ids exceed the integer range JSON consumers
// can represent exactly.
impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake id as string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::custom("snowflake id cannot be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
                v.trim().parse::<u64>().map(Snowflake).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}

/// Immutable snapshot of a chat message at observation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub author: String,
    pub content: String,
    /// Creation instant, ISO-8601.
    pub timestamp: String,
    pub channel_id: Snowflake,
}

impl Message {
    pub fn from_raw(raw: &RawMessage) -> CoreResult<Self> {
        Ok(Self {
            id: Snowflake::parse_field("message id", &raw.id)?,
            author: raw.author.display_name(),
            content: raw.content.clone(),
            timestamp: raw.timestamp.clone(),
            channel_id: Snowflake::parse_field("channel id", &raw.channel_id)?,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {}\n{} ({}): {}",
            self.id, self.author, self.timestamp, self.content
        )
    }
}

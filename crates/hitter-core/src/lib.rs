pub mod command;
pub mod protocol;

pub use command::{Command, Target};
pub use protocol::{
    decode_inbound, CollPayload, FullState, Inbound, LenientU64, NodePayload, ProtocolError,
    QpsPoint, DEFAULT_MAX_FRAME_BYTES,
};

use serde::{Deserialize, Deserializer};

/// A data collection a worker can write into, addressed on the wire by its tag letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collection {
    pub tag: &'static str,
    pub name: &'static str,
}

pub const COLLECTIONS: [Collection; 5] = [
    Collection {
        tag: "A",
        name: "advertiser",
    },
    Collection {
        tag: "C",
        name: "campaign",
    },
    Collection {
        tag: "D",
        name: "device_data",
    },
    Collection {
        tag: "L",
        name: "location_data",
    },
    Collection {
        tag: "T",
        name: "total_data",
    },
];

pub fn collection_by_tag(tag: &str) -> Option<Collection> {
    COLLECTIONS
        .iter()
        .copied()
        .find(|coll| coll.tag.eq_ignore_ascii_case(tag))
}

/// The service marshals empty lists as `null`; treat that like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_lookup_is_case_insensitive() {
        assert_eq!(collection_by_tag("d").map(|c| c.name), Some("device_data"));
        assert_eq!(collection_by_tag("T").map(|c| c.name), Some("total_data"));
        assert!(collection_by_tag("Z").is_none());
    }
}

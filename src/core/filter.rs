//! Log filters, their fragment expansion, and deterministic fragment ids.
//!
//! `spec.md` §3: "A log filter `{address?, topic0?..topic3?}` may contain
//! arrays (OR within a slot). A *fragment* is a fully specialized filter
//! with at most one value per slot; a filter expands into the cross product
//! of its arrays." Factory fragments additionally carry the
//! `(eventSelector, childAddressLocation)` pair describing how to pull a
//! child address out of a matching log.

use std::hash::{Hash, Hasher};

use alloy::primitives::{Address, B256, keccak256};
use serde::{Deserialize, Serialize};

/// One slot of a log filter: either unconstrained, a single value, or an
/// OR-list of values that expands into one fragment per value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterSlot<T> {
    /// No constraint on this slot.
    #[default]
    Any,
    /// Exactly one allowed value.
    One(T),
    /// Any of several allowed values (OR).
    OneOf(Vec<T>),
}

impl<T: Clone> FilterSlot<T> {
    /// Expand this slot into the values a fragment may pin it to. `Any`
    /// expands to a single `None` (unconstrained fragment slot).
    fn expand(&self) -> Vec<Option<T>> {
        match self {
            Self::Any => vec![None],
            Self::One(v) => vec![Some(v.clone())],
            Self::OneOf(vs) => vs.iter().cloned().map(Some).collect(),
        }
    }
}

/// A user-declared log filter, possibly with OR-array slots, as it appears
/// in a source declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LogFilter {
    /// Contract address slot.
    pub address: FilterSlot<Address>,
    /// `topic0` slot (typically the event selector).
    pub topic0: FilterSlot<B256>,
    /// `topic1` slot.
    pub topic1: FilterSlot<B256>,
    /// `topic2` slot.
    pub topic2: FilterSlot<B256>,
    /// `topic3` slot.
    pub topic3: FilterSlot<B256>,
}

/// A fully specialized filter fragment: at most one concrete value per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilterFragment {
    /// Contract address, or `None` if unconstrained.
    pub address: Option<Address>,
    /// `topic0`, or `None` if unconstrained.
    pub topic0: Option<B256>,
    /// `topic1`, or `None` if unconstrained.
    pub topic1: Option<B256>,
    /// `topic2`, or `None` if unconstrained.
    pub topic2: Option<B256>,
    /// `topic3`, or `None` if unconstrained.
    pub topic3: Option<B256>,
}

impl LogFilterFragment {
    /// Deterministic fingerprint id for this fragment, used as the primary
    /// key of `logFilters` rows so identical fragments across restarts (and
    /// across config reloads) resolve to the same interval bookkeeping.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut buf = Vec::with_capacity(4 * 33);
        for slot in [
            self.address.map(|a| a.0.0.to_vec()),
            self.topic0.map(|t| t.0.to_vec()),
            self.topic1.map(|t| t.0.to_vec()),
            self.topic2.map(|t| t.0.to_vec()),
            self.topic3.map(|t| t.0.to_vec()),
        ] {
            match slot {
                Some(bytes) => {
                    buf.push(1);
                    buf.extend_from_slice(&bytes);
                }
                None => buf.push(0),
            }
        }
        hex::encode(keccak256(buf))
    }

    /// Whether a log with these fields matches this fragment (all
    /// constrained slots equal; unconstrained slots match anything).
    #[must_use]
    pub fn matches(
        &self,
        address: Address,
        topics: &[Option<B256>; 4],
    ) -> bool {
        self.address.is_none_or(|a| a == address)
            && self.topic0.is_none_or(|t| Some(t) == topics[0])
            && self.topic1.is_none_or(|t| Some(t) == topics[1])
            && self.topic2.is_none_or(|t| Some(t) == topics[2])
            && self.topic3.is_none_or(|t| Some(t) == topics[3])
    }
}

impl LogFilter {
    /// Expand this filter into the cross product of its array slots.
    #[must_use]
    pub fn fragments(&self) -> Vec<LogFilterFragment> {
        let mut out = Vec::new();
        for address in self.address.expand() {
            for topic0 in self.topic0.expand() {
                for topic1 in self.topic1.expand() {
                    for topic2 in self.topic2.expand() {
                        for topic3 in self.topic3.expand() {
                            out.push(LogFilterFragment {
                                address,
                                topic0,
                                topic1,
                                topic2,
                                topic3,
                            });
                        }
                    }
                }
            }
        }
        out
    }
}

/// Where within a log to find a factory-produced child address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildAddressLocation {
    /// Last 20 bytes of topic 1, 2, or 3.
    Topic(u8),
    /// 20 bytes at byte offset `12 + N` within `data`.
    DataOffset(usize),
}

/// A fully specialized factory fragment: the filter selecting the factory's
/// announcement logs, plus how to pull the child address out of each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactoryFragment {
    /// Address of the factory contract.
    pub factory_address: Address,
    /// Selector of the event the factory emits when deploying a child.
    pub event_selector: B256,
    /// Where to find the 20-byte child address in a matching log.
    pub child_address_location: ChildAddressLocation,
}

impl Hash for ChildAddressLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Topic(n) => {
                0u8.hash(state);
                n.hash(state);
            }
            Self::DataOffset(n) => {
                1u8.hash(state);
                n.hash(state);
            }
        }
    }
}

impl FactoryFragment {
    /// Deterministic fingerprint id, mirroring [`LogFilterFragment::fingerprint`].
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.factory_address.0.0);
        buf.extend_from_slice(&self.event_selector.0);
        match self.child_address_location {
            ChildAddressLocation::Topic(n) => {
                buf.push(0);
                buf.push(n);
            }
            ChildAddressLocation::DataOffset(n) => {
                buf.push(1);
                #[allow(clippy::cast_possible_truncation)]
                buf.extend_from_slice(&(n as u64).to_be_bytes());
            }
        }
        hex::encode(keccak256(buf))
    }

    /// Extract the child address from a matching log's data/topics.
    ///
    /// # Errors
    /// Returns an error if the location points outside the available bytes.
    pub fn extract_child_address(
        &self,
        topics: &[B256],
        data: &[u8],
    ) -> Result<Address, ExtractAddressError> {
        match self.child_address_location {
            ChildAddressLocation::Topic(n) => {
                let topic = topics
                    .get(usize::from(n))
                    .ok_or(ExtractAddressError::MissingTopic(n))?;
                Ok(Address::from_slice(&topic.0[12..32]))
            }
            ChildAddressLocation::DataOffset(offset) => {
                let start = 12 + offset;
                let end = start + 20;
                let slice = data
                    .get(start..end)
                    .ok_or(ExtractAddressError::DataTooShort { offset, len: data.len() })?;
                Ok(Address::from_slice(slice))
            }
        }
    }
}

/// Error extracting a child address from a factory log.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractAddressError {
    /// The log did not have the requested topic slot.
    #[error("log is missing topic{0}")]
    MissingTopic(u8),
    /// `data` was too short for the configured offset.
    #[error("data too short for offset {offset}: len={len}")]
    DataTooShort {
        /// Configured byte offset.
        offset: usize,
        /// Actual length of `data`.
        len: usize,
    },
}

/// Error parsing a config-declared `childAddressLocation` string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid childAddressLocation: {0}")]
pub struct ParseChildAddressLocationError(pub String);

/// Interprets a factory fragment's `childAddressLocation` string form
/// (`"topic1"`, `"offset32"`) as it arrives from config-driven factory
/// declarations, shared by every backend that persists factory filters
/// (`src/store/postgres.rs`, `src/store/sqlite.rs`).
///
/// # Errors
/// Returns an error if `raw` doesn't match `topic{1,2,3}` or `offsetN`.
pub fn parse_child_address_location(
    raw: &str,
) -> Result<ChildAddressLocation, ParseChildAddressLocationError> {
    if let Some(n) = raw.strip_prefix("topic") {
        let n: u8 = n.parse().map_err(|_| ParseChildAddressLocationError(raw.to_string()))?;
        return Ok(ChildAddressLocation::Topic(n));
    }
    if let Some(n) = raw.strip_prefix("offset") {
        let n: usize = n.parse().map_err(|_| ParseChildAddressLocationError(raw.to_string()))?;
        return Ok(ChildAddressLocation::DataOffset(n));
    }
    Err(ParseChildAddressLocationError(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn any_filter_expands_to_single_unconstrained_fragment() {
        let filter = LogFilter::default();
        let fragments = filter.fragments();
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].address.is_none());
    }

    #[test]
    fn array_slots_cross_product() {
        let a1 = address!("1111111111111111111111111111111111111111");
        let a2 = address!("2222222222222222222222222222222222222222");
        let t1 = B256::repeat_byte(1);
        let t2 = B256::repeat_byte(2);
        let filter = LogFilter {
            address: FilterSlot::OneOf(vec![a1, a2]),
            topic0: FilterSlot::OneOf(vec![t1, t2]),
            ..Default::default()
        };
        assert_eq!(filter.fragments().len(), 4);
    }

    #[test]
    fn fingerprint_is_deterministic_and_distinguishes_fragments() {
        let f1 = LogFilterFragment {
            address: Some(address!("1111111111111111111111111111111111111111")),
            topic0: None,
            topic1: None,
            topic2: None,
            topic3: None,
        };
        let f2 = LogFilterFragment {
            address: Some(address!("2222222222222222222222222222222222222222")),
            ..f1
        };
        assert_eq!(f1.fingerprint(), f1.fingerprint());
        assert_ne!(f1.fingerprint(), f2.fingerprint());
    }

    #[test]
    fn matches_respects_unconstrained_slots() {
        let frag = LogFilterFragment {
            address: Some(address!("1111111111111111111111111111111111111111")),
            topic0: Some(B256::repeat_byte(9)),
            topic1: None,
            topic2: None,
            topic3: None,
        };
        let addr = address!("1111111111111111111111111111111111111111");
        let topics = [Some(B256::repeat_byte(9)), Some(B256::repeat_byte(7)), None, None];
        assert!(frag.matches(addr, &topics));
    }

    #[test]
    fn factory_extract_from_topic() {
        let child = address!("3333333333333333333333333333333333333333");
        let mut topic_bytes = [0u8; 32];
        topic_bytes[12..32].copy_from_slice(&child.0.0);
        let topic = B256::from(topic_bytes);
        let factory = FactoryFragment {
            factory_address: address!("1111111111111111111111111111111111111111"),
            event_selector: B256::repeat_byte(1),
            child_address_location: ChildAddressLocation::Topic(1),
        };
        let extracted = factory
            .extract_child_address(&[B256::repeat_byte(1), topic], &[])
            .unwrap();
        assert_eq!(extracted, child);
    }

    #[test]
    fn factory_extract_from_data_offset() {
        let child = address!("4444444444444444444444444444444444444444");
        let mut data = vec![0u8; 64];
        data[12..32].copy_from_slice(&child.0.0);
        let factory = FactoryFragment {
            factory_address: address!("1111111111111111111111111111111111111111"),
            event_selector: B256::repeat_byte(1),
            child_address_location: ChildAddressLocation::DataOffset(0),
        };
        let extracted = factory.extract_child_address(&[], &data).unwrap();
        assert_eq!(extracted, child);
    }

    #[test]
    fn factory_extract_data_too_short_errors() {
        let factory = FactoryFragment {
            factory_address: address!("1111111111111111111111111111111111111111"),
            event_selector: B256::repeat_byte(1),
            child_address_location: ChildAddressLocation::DataOffset(100),
        };
        assert!(factory.extract_child_address(&[], &[0u8; 4]).is_err());
    }

    #[test]
    fn parses_topic_location() {
        assert_eq!(parse_child_address_location("topic1").unwrap(), ChildAddressLocation::Topic(1));
    }

    #[test]
    fn parses_offset_location() {
        assert_eq!(
            parse_child_address_location("offset32").unwrap(),
            ChildAddressLocation::DataOffset(32)
        );
    }

    #[test]
    fn rejects_malformed_location() {
        assert!(parse_child_address_location("bogus").is_err());
    }
}

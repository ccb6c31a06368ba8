//! # Fragmentation Codec
//!
//! Splits a state blob into encrypted fragments and rebuilds it. A
//! fragment set is all-or-nothing: any gap or failed verification
//! rejects the whole set.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::context::Collaborators;
use crate::algorithms::{fragment_ranges, payload_digest};
use crate::domain::{
    invariant_complete_fragment_set, AuditEventKind, ChannelId, Fragment, FragmentId,
    PartitionError,
};
use crate::ports::inbound::FragmentationApi;

/// Fragmentation codec for one deployment.
pub struct FragmentationCodec {
    collaborators: Collaborators,
    max_fragment_count: usize,
}

impl FragmentationCodec {
    /// Create a codec bounded to `max_fragment_count` fragments per session.
    pub fn new(collaborators: Collaborators, max_fragment_count: usize) -> Self {
        Self {
            collaborators,
            max_fragment_count,
        }
    }

    /// Reassemble a complete session and drop its fragments.
    ///
    /// On failure the session is left untouched.
    pub async fn consume(&self, set: &mut FragmentSet) -> Result<Vec<u8>, PartitionError> {
        let data = self
            .reassemble(&set.channel_id, &set.fragments, set.expected)
            .await?;
        set.fragments.clear();
        Ok(data)
    }

    fn verify(
        fragment: &Fragment,
        channel_id: &ChannelId,
        index: u32,
        expected: u32,
    ) -> Result<(), PartitionError> {
        let reject = |reason: &str| PartitionError::FragmentIntegrity {
            index,
            reason: reason.to_string(),
        };

        if fragment.index != index {
            return Err(reject("index does not match its slot"));
        }
        if fragment.count != expected {
            return Err(reject("fragment count differs from session"));
        }
        if &fragment.channel_id != channel_id {
            return Err(reject("fragment belongs to another channel"));
        }
        if payload_digest(&fragment.payload) != fragment.digest {
            return Err(reject("payload digest mismatch"));
        }
        Ok(())
    }
}

#[async_trait]
impl FragmentationApi for FragmentationCodec {
    async fn fragment(
        &self,
        channel_id: &ChannelId,
        data: &[u8],
        count: usize,
    ) -> Result<Vec<Fragment>, PartitionError> {
        if count > self.max_fragment_count || count > u32::MAX as usize {
            return Err(PartitionError::InvalidFragmentCount {
                count,
                len: data.len(),
            });
        }

        let ranges = fragment_ranges(data.len(), count)?;
        let now = self.collaborators.now();

        let mut fragments = Vec::with_capacity(count);
        for (i, range) in ranges.into_iter().enumerate() {
            let index = i as u32;
            let payload = self.collaborators.encrypt(&data[range])?;
            fragments.push(Fragment {
                id: FragmentId::derive(channel_id, index),
                channel_id: channel_id.clone(),
                index,
                count: count as u32,
                digest: payload_digest(&payload),
                payload,
                created_at: now,
            });
        }

        debug!(
            "[qc-18] Fragmented {} bytes of {} into {} fragments",
            data.len(),
            channel_id,
            count
        );

        self.collaborators
            .audit(
                channel_id,
                AuditEventKind::Fragmented,
                json!({ "count": count, "bytes": data.len() }),
            )
            .await?;

        Ok(fragments)
    }

    async fn reassemble(
        &self,
        channel_id: &ChannelId,
        fragments: &BTreeMap<u32, Fragment>,
        expected_count: u32,
    ) -> Result<Vec<u8>, PartitionError> {
        if expected_count == 0 {
            return Err(PartitionError::InvalidFragmentCount {
                count: 0,
                len: fragments.len(),
            });
        }

        if let Err(err) = invariant_complete_fragment_set(fragments.keys().copied(), expected_count)
        {
            warn!("[qc-18] Rejecting fragment set for {}: {}", channel_id, err);
            return Err(err);
        }
        if let Some(extra) = fragments.keys().find(|i| **i >= expected_count) {
            return Err(PartitionError::FragmentIntegrity {
                index: *extra,
                reason: "index outside session range".to_string(),
            });
        }

        // Verify everything before decrypting anything.
        for (index, fragment) in fragments {
            Self::verify(fragment, channel_id, *index, expected_count)?;
        }

        let mut data = Vec::new();
        for fragment in fragments.values() {
            let plaintext = self.collaborators.decrypt(&fragment.payload)?;
            data.extend_from_slice(&plaintext);
        }

        self.collaborators
            .audit(
                channel_id,
                AuditEventKind::Reassembled,
                json!({ "count": expected_count, "bytes": data.len() }),
            )
            .await?;

        Ok(data)
    }
}

/// Fragments of one session, collected as they arrive.
#[derive(Clone, Debug)]
pub struct FragmentSet {
    channel_id: ChannelId,
    expected: u32,
    fragments: BTreeMap<u32, Fragment>,
}

impl FragmentSet {
    /// Empty session for `channel_id` expecting `expected` fragments.
    pub fn new(channel_id: ChannelId, expected: u32) -> Self {
        Self {
            channel_id,
            expected,
            fragments: BTreeMap::new(),
        }
    }

    /// Session holding every fragment of `fragments`.
    pub fn from_fragments(
        channel_id: ChannelId,
        expected: u32,
        fragments: Vec<Fragment>,
    ) -> Result<Self, PartitionError> {
        let mut set = Self::new(channel_id, expected);
        for fragment in fragments {
            set.insert(fragment)?;
        }
        Ok(set)
    }

    /// Add one fragment. Fragments of another session or duplicates are rejected.
    pub fn insert(&mut self, fragment: Fragment) -> Result<(), PartitionError> {
        let index = fragment.index;
        let reject = |reason: &str| PartitionError::FragmentIntegrity {
            index,
            reason: reason.to_string(),
        };

        if fragment.channel_id != self.channel_id {
            return Err(reject("fragment belongs to another channel"));
        }
        if fragment.count != self.expected || index >= self.expected {
            return Err(reject("fragment belongs to another session"));
        }
        if self.fragments.contains_key(&index) {
            return Err(reject("duplicate index"));
        }

        self.fragments.insert(index, fragment);
        Ok(())
    }

    /// Indices not yet received.
    pub fn missing_indices(&self) -> Vec<u32> {
        (0..self.expected)
            .filter(|i| !self.fragments.contains_key(i))
            .collect()
    }

    /// Check if every index is present.
    pub fn is_complete(&self) -> bool {
        self.fragments.len() == self.expected as usize
    }

    /// Number of fragments held.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments held, by index.
    pub fn fragments(&self) -> &BTreeMap<u32, Fragment> {
        &self.fragments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedger;
    use crate::ports::outbound::{EncryptionService, ManualClock, MockEncryption};
    use std::sync::Arc;

    fn create_codec() -> (FragmentationCodec, Arc<InMemoryLedger>, Arc<MockEncryption>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let encryption = Arc::new(MockEncryption::default());
        let collaborators = Collaborators::new(
            ledger.clone(),
            encryption.clone(),
            Arc::new(ManualClock::new(1_000)),
        );
        (FragmentationCodec::new(collaborators, 16), ledger, encryption)
    }

    fn channel() -> ChannelId {
        ChannelId::from("chan-1")
    }

    fn by_index(fragments: Vec<Fragment>) -> BTreeMap<u32, Fragment> {
        fragments.into_iter().map(|f| (f.index, f)).collect()
    }

    #[tokio::test]
    async fn test_ten_bytes_into_three() {
        let (codec, _, enc) = create_codec();
        let data = b"0123456789";

        let fragments = codec.fragment(&channel(), data, 3).await.unwrap();
        let sizes: Vec<usize> = fragments
            .iter()
            .map(|f| enc.decrypt(&f.payload).unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 4]);

        let rebuilt = codec
            .reassemble(&channel(), &by_index(fragments), 3)
            .await
            .unwrap();
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_payloads_are_encrypted() {
        let (codec, _, _) = create_codec();
        let fragments = codec.fragment(&channel(), b"abcdef", 2).await.unwrap();
        assert_ne!(fragments[0].payload, b"abc");
        assert_eq!(fragments[1].id.as_str(), "chan-1/fragment-1");
    }

    #[tokio::test]
    async fn test_invalid_counts() {
        let (codec, ledger, _) = create_codec();
        assert!(matches!(
            codec.fragment(&channel(), b"abc", 0).await,
            Err(PartitionError::InvalidFragmentCount { .. })
        ));
        assert!(matches!(
            codec.fragment(&channel(), b"ab", 3).await,
            Err(PartitionError::InvalidFragmentCount { .. })
        ));
        assert!(matches!(
            codec.fragment(&channel(), &[0u8; 100], 17).await,
            Err(PartitionError::InvalidFragmentCount { .. })
        ));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_missing_index_fails_without_audit() {
        let (codec, ledger, _) = create_codec();
        let mut fragments = by_index(codec.fragment(&channel(), b"0123456789", 3).await.unwrap());
        fragments.remove(&1);

        let result = codec.reassemble(&channel(), &fragments, 3).await;
        assert!(matches!(
            result,
            Err(PartitionError::IncompleteFragmentSet { ref missing, .. }) if missing == &vec![1]
        ));
        assert_eq!(ledger.count(AuditEventKind::Reassembled), 0);
    }

    #[tokio::test]
    async fn test_tampered_fragment_rejected() {
        let (codec, _, _) = create_codec();
        let mut fragments = by_index(codec.fragment(&channel(), b"0123456789", 2).await.unwrap());
        if let Some(f) = fragments.get_mut(&0) {
            f.payload[0] ^= 0xFF;
        }

        assert!(matches!(
            codec.reassemble(&channel(), &fragments, 2).await,
            Err(PartitionError::FragmentIntegrity { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_foreign_channel_rejected() {
        let (codec, _, _) = create_codec();
        let fragments = by_index(codec.fragment(&channel(), b"0123456789", 2).await.unwrap());
        assert!(codec
            .reassemble(&ChannelId::from("other"), &fragments, 2)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reassemble_idempotent() {
        let (codec, ledger, _) = create_codec();
        let fragments = by_index(codec.fragment(&channel(), b"idempotent!", 4).await.unwrap());

        let first = codec.reassemble(&channel(), &fragments, 4).await.unwrap();
        let second = codec.reassemble(&channel(), &fragments, 4).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.count(AuditEventKind::Fragmented), 1);
        assert_eq!(ledger.count(AuditEventKind::Reassembled), 2);
    }

    #[tokio::test]
    async fn test_encryption_failure_surfaces() {
        let (codec, ledger, enc) = create_codec();
        enc.set_failing(true);
        assert!(matches!(
            codec.fragment(&channel(), b"0123", 2).await,
            Err(PartitionError::EncryptionFailed(_))
        ));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_fragment_set_consume() {
        let (codec, _, _) = create_codec();
        let fragments = codec.fragment(&channel(), b"0123456789", 3).await.unwrap();

        let mut set = FragmentSet::new(channel(), 3);
        let mut iter = fragments.into_iter();
        set.insert(iter.next().unwrap()).unwrap();
        assert_eq!(set.missing_indices(), vec![1, 2]);
        assert!(codec.consume(&mut set).await.is_err());
        assert_eq!(set.len(), 1);

        for f in iter {
            set.insert(f).unwrap();
        }
        assert!(set.is_complete());
        assert_eq!(codec.consume(&mut set).await.unwrap(), b"0123456789");
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_fragment_set_rejects_duplicates_and_strangers() {
        let (codec, _, _) = create_codec();
        let fragments = codec.fragment(&channel(), b"0123456789", 2).await.unwrap();
        let mut set = FragmentSet::new(channel(), 2);
        set.insert(fragments[0].clone()).unwrap();

        assert!(set.insert(fragments[0].clone()).is_err());

        let mut stranger = FragmentSet::new(channel(), 3);
        assert!(stranger.insert(fragments[1].clone()).is_err());
    }
}

//! Pack file encoder/decoder implementations, waitlists, and stream wrappers
//! that faithfully follow the
//! [pack-format spec](https://git-scm.com/docs/pack-format).

pub mod decode;
pub mod encode;
pub mod entry;
mod index_entry;
pub mod pack_index;
pub mod waitlist;
pub mod wrapper;

pub use decode::Pack;
pub use encode::{PackEncoder, PendingPack};

#[cfg(test)]
mod tests {
    use tracing_subscriber::util::SubscriberInitExt;

    /// Shared tracing bootstrap for pack tests; safe to call repeatedly.
    pub(crate) fn init_logger() {
        let _ = tracing_subscriber::fmt::Subscriber::builder()
            .with_target(false)
            .without_time()
            .with_level(true)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
            .try_init(); // avoid multi-init
    }

    /// Pack + idx produced together agree on hash and membership.
    #[tokio::test]
    async fn pending_pack_flush_pairs_pack_and_idx() {
        init_logger();
        use super::*;
        use crate::internal::object::types::ObjectType;
        use bytes::Bytes;

        let mut pending = PendingPack::new();
        let id_a = pending.add_object(ObjectType::Blob, b"alpha".to_vec());
        let id_b = pending.add_object(ObjectType::Blob, b"beta".to_vec());
        assert_eq!(pending.len(), 2);

        let (pack, idx, pack_hash) = pending.flush(10).await.unwrap();
        assert_eq!(&pack[..4], b"PACK");

        let reader = pack_index::IdxReader::parse(Bytes::from(idx)).unwrap();
        assert_eq!(reader.pack_hash().unwrap(), pack_hash);
        assert!(reader.has(&id_a));
        assert!(reader.has(&id_b));
    }
}

// =============================================================================
// Matrixon Streams - Consumer Bus Storage
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// =============================================================================

use std::ops::Bound;

use async_trait::async_trait;

use crate::{
    database::{
        abstraction::{prefix_bounds, ReadView, Transaction},
        key, prefix, trees, KeyValueDatabase,
    },
    service, utils, Error, Result,
};

fn topic_counter(topic: &str) -> Vec<u8> {
    key(&[b"topic", topic.as_bytes()])
}

#[async_trait]
impl service::consumers::Data for KeyValueDatabase {
    async fn append(&self, txn: &mut Transaction, topic: &'static str, payload: &[u8]) -> Result<u64> {
        let counter = topic_counter(topic);
        txn.lock_row(trees::COUNTERS, &counter).await;
        let offset = txn
            .get(trees::COUNTERS, &counter)?
            .map(|bytes| utils::u64_from_bytes(&bytes))
            .transpose()?
            .unwrap_or_default()
            + 1;
        txn.insert(trees::COUNTERS, &counter, &offset.to_be_bytes());
        txn.insert(
            trees::TOPICID_MESSAGE,
            &key(&[topic.as_bytes(), &offset.to_be_bytes()]),
            payload,
        );
        Ok(offset)
    }

    fn messages_after(
        &self,
        view: &dyn ReadView,
        topic: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<(u64, Vec<u8>)>> {
        let topic_prefix = prefix(&[topic.as_bytes()]);
        let (_, to) = prefix_bounds(&topic_prefix);
        let from = Bound::Excluded(key(&[topic.as_bytes(), &offset.to_be_bytes()]));

        view.scan(trees::TOPICID_MESSAGE, from, to, false, Some(limit))?
            .into_iter()
            .map(|(key, payload)| {
                let offset = key
                    .get(topic_prefix.len()..)
                    .ok_or_else(|| Error::bad_database("Invalid key in topicid_message."))
                    .and_then(utils::u64_from_bytes)?;
                Ok((offset, payload))
            })
            .collect()
    }

    fn acked_offset(&self, view: &dyn ReadView, consumer: &str) -> Result<u64> {
        view.get(trees::CONSUMER_OFFSET, consumer.as_bytes())?
            .map(|bytes| utils::u64_from_bytes(&bytes))
            .transpose()
            .map(Option::unwrap_or_default)
    }

    fn ack(&self, txn: &mut Transaction, consumer: &str, offset: u64) -> Result<()> {
        txn.insert(trees::CONSUMER_OFFSET, consumer.as_bytes(), &offset.to_be_bytes());
        Ok(())
    }

    fn prune(&self, txn: &mut Transaction, topic: &str, until: u64) -> Result<usize> {
        let topic_prefix = prefix(&[topic.as_bytes()]);
        let to = Bound::Included(key(&[topic.as_bytes(), &until.to_be_bytes()]));
        let rows = txn.scan(
            trees::TOPICID_MESSAGE,
            Bound::Included(topic_prefix),
            to,
            false,
            None,
        )?;
        for (key, _) in &rows {
            txn.remove(trees::TOPICID_MESSAGE, key);
        }
        Ok(rows.len())
    }
}

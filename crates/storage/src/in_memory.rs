use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use wecom_relay_core::{Configuration, Error, ReceivedMessage, Result};

use crate::store::{
    ConfigStore, DateCount, MessagePage, MessageQuery, MessageStats, MessageStore, SortOrder,
    STATS_DATE_BUCKETS,
};

/// Process-local store for tests and ephemeral gateways.
#[derive(Default)]
pub struct InMemoryStore {
    configs: RwLock<HashMap<String, Configuration>>,
    messages: RwLock<HashMap<String, ReceivedMessage>>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::Storage(format!("Lock error: {}", e))
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ReceivedMessage>>> {
        self.messages.read().map_err(poisoned)
    }

    fn messages_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ReceivedMessage>>> {
        self.messages.write().map_err(poisoned)
    }

    pub fn message_count(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl ConfigStore for InMemoryStore {
    fn get_by_code(&self, code: &str) -> Result<Option<Configuration>> {
        Ok(self.configs.read().map_err(poisoned)?.get(code).cloned())
    }

    fn save(&self, config: &Configuration) -> Result<()> {
        self.configs
            .write()
            .map_err(poisoned)?
            .insert(config.code.clone(), config.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Configuration>> {
        let mut all: Vec<Configuration> =
            self.configs.read().map_err(poisoned)?.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

impl MessageStore for InMemoryStore {
    fn upsert(&self, message: &ReceivedMessage) -> Result<()> {
        let mut messages = self.messages_write()?;
        let mut record = message.clone();
        record.is_reply = record.quote.is_some();
        if let Some(existing) = messages.get(&message.message_id) {
            record.is_read = existing.is_read;
        }
        messages.insert(record.message_id.clone(), record);
        Ok(())
    }

    fn mark_read(&self, message_id: &str) -> Result<bool> {
        let mut messages = self.messages_write()?;
        match messages.get_mut(message_id) {
            Some(m) => {
                m.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn mark_read_many(&self, config_code: &str, message_ids: &[String]) -> Result<usize> {
        let mut messages = self.messages_write()?;
        let mut updated = 0;
        for id in message_ids {
            if let Some(m) = messages.get_mut(id).filter(|m| m.config_code == config_code) {
                m.is_read = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn get(&self, message_id: &str) -> Result<Option<ReceivedMessage>> {
        Ok(self.messages_read()?.get(message_id).cloned())
    }

    fn query(&self, query: &MessageQuery) -> Result<MessagePage> {
        let messages = self.messages_read()?;
        let mut hits: Vec<&ReceivedMessage> =
            messages.values().filter(|m| query.matches(m)).collect();

        hits.sort_by(|a, b| {
            (a.create_time, &a.message_id).cmp(&(b.create_time, &b.message_id))
        });
        if query.sort_order == SortOrder::Desc {
            hits.reverse();
        }

        let total = hits.len() as u64;
        let page: Vec<ReceivedMessage> = hits
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect();
        Ok(MessagePage::new(page, total, query))
    }

    fn stats(&self, config_code: &str) -> Result<MessageStats> {
        let messages = self.messages_read()?;
        let mut stats = MessageStats::default();
        let mut users = HashSet::new();
        let mut by_date: BTreeMap<String, u64> = BTreeMap::new();

        for m in messages.values().filter(|m| m.config_code == config_code) {
            stats.total_messages += 1;
            if !m.is_read {
                stats.unread_count += 1;
            }
            if m.is_reply {
                stats.reply_count += 1;
            }
            users.insert(m.from_user.as_str());
            *stats.by_type.entry(m.msg_type.as_str().to_string()).or_default() += 1;
            *by_date.entry(m.created_date.clone()).or_default() += 1;

            if stats.first_message_time.as_deref().map_or(true, |t| m.created_time.as_str() < t) {
                stats.first_message_time = Some(m.created_time.clone());
            }
            if stats.last_message_time.as_deref().map_or(true, |t| m.created_time.as_str() > t) {
                stats.last_message_time = Some(m.created_time.clone());
            }
        }

        stats.user_count = users.len() as u64;
        stats.by_date = by_date
            .into_iter()
            .rev()
            .take(STATS_DATE_BUCKETS)
            .map(|(date, count)| DateCount { date, count })
            .collect();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_configuration, sample_message};
    use wecom_relay_core::MsgType;

    #[test]
    fn test_config_round_trip() {
        let store = InMemoryStore::new();
        let cfg = sample_configuration("wwCORP");
        store.save(&cfg).unwrap();
        assert_eq!(store.get_by_code(&cfg.code).unwrap(), Some(cfg));
        assert!(store.get_by_code("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let store = InMemoryStore::new();
        let msg = sample_message("123", "cfg");
        store.upsert(&msg).unwrap();
        store.upsert(&msg).unwrap();
        assert_eq!(store.message_count(), 1);

        assert!(store.mark_read("123").unwrap());
        let mut changed = msg.clone();
        changed.content = Some("second".to_string());
        store.upsert(&changed).unwrap();

        let stored = store.get("123").unwrap().unwrap();
        assert_eq!(store.message_count(), 1);
        assert_eq!(stored.content.as_deref(), Some("second"));
        assert!(stored.is_read);
    }

    #[test]
    fn test_mark_read_many_skips_other_configs() {
        let store = InMemoryStore::new();
        store.upsert(&sample_message("a", "cfg")).unwrap();
        store.upsert(&sample_message("b", "other")).unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.mark_read_many("cfg", &ids).unwrap(), 1);
        assert!(store.get("a").unwrap().unwrap().is_read);
        assert!(!store.get("b").unwrap().unwrap().is_read);
    }

    #[test]
    fn test_query_matches_sqlite_semantics() {
        let store = InMemoryStore::new();
        for i in 0..4 {
            let mut m = sample_message(&format!("m{}", i), "cfg");
            m.create_time = 1_700_000_000 + i;
            if i == 3 {
                m.msg_type = MsgType::Event;
            }
            store.upsert(&m).unwrap();
        }

        let page = store
            .query(&MessageQuery {
                limit: Some(3),
                ..MessageQuery::for_config("cfg")
            })
            .unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.messages[0].message_id, "m3");

        let events = store
            .query(&MessageQuery {
                msg_type: Some(MsgType::Event),
                ..MessageQuery::for_config("cfg")
            })
            .unwrap();
        assert_eq!(events.total, 1);

        store.mark_read("m0").unwrap();
        let unread = store
            .query(&MessageQuery {
                is_read: Some(false),
                ..MessageQuery::for_config("cfg")
            })
            .unwrap();
        assert_eq!(unread.total, 3);

        let stats = store.stats("cfg").unwrap();
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.unread_count, 3);
        assert_eq!(stats.by_type.get("text"), Some(&3));
    }
}

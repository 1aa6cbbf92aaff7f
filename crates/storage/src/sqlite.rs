use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use wecom_relay_core::{
    Configuration, Error, MsgType, QuotedMessage, ReceivedMessage, Result,
};

use crate::store::{
    ConfigStore, DateCount, MessagePage, MessageQuery, MessageStats, MessageStore,
    STATS_DATE_BUCKETS,
};

/// SQLite-backed configuration and message store.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open relay db: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(format!("Lock error: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS configurations (
                code TEXT PRIMARY KEY,
                corp_id TEXT NOT NULL,
                encrypted_corp_secret TEXT,
                agent_id INTEGER,
                touser TEXT NOT NULL DEFAULT '',
                description TEXT,
                callback_token TEXT,
                encrypted_encoding_aes_key TEXT,
                callback_enabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS received_messages (
                message_id TEXT PRIMARY KEY,
                config_code TEXT NOT NULL,
                from_user TEXT NOT NULL,
                from_user_name TEXT,
                to_user TEXT,
                agent_id INTEGER,
                msg_type TEXT NOT NULL,
                content TEXT,
                media_id TEXT,
                pic_url TEXT,
                format TEXT,
                recognition TEXT,
                thumb_media_id TEXT,
                location_x REAL,
                location_y REAL,
                scale INTEGER,
                label TEXT,
                title TEXT,
                description TEXT,
                url TEXT,
                file_name TEXT,
                file_size INTEGER,
                quote_msg_id TEXT,
                quote_content TEXT,
                quote_from_user TEXT,
                quote_from_user_name TEXT,
                quote_msg_type TEXT,
                event_type TEXT,
                event_key TEXT,
                create_time INTEGER NOT NULL,
                created_time TEXT NOT NULL,
                created_date TEXT NOT NULL,
                is_reply INTEGER NOT NULL DEFAULT 0,
                is_read INTEGER NOT NULL DEFAULT 0,
                received_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_config ON received_messages(config_code);
            CREATE INDEX IF NOT EXISTS idx_messages_date ON received_messages(created_date);
            CREATE INDEX IF NOT EXISTS idx_messages_type ON received_messages(msg_type);
            CREATE INDEX IF NOT EXISTS idx_messages_from ON received_messages(from_user);
            CREATE INDEX IF NOT EXISTS idx_messages_read ON received_messages(is_read);
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init relay schema: {}", e)))?;

        debug!("Relay store schema initialized");
        Ok(())
    }
}

fn row_to_configuration(row: &Row<'_>) -> rusqlite::Result<Configuration> {
    let touser: String = row.get("touser")?;
    let enabled: i64 = row.get("callback_enabled")?;
    Ok(Configuration {
        code: row.get("code")?,
        corp_id: row.get("corp_id")?,
        encrypted_corp_secret: row.get("encrypted_corp_secret")?,
        agent_id: row.get("agent_id")?,
        recipients: Configuration::parse_recipients(&touser),
        description: row.get("description")?,
        callback_token: row.get("callback_token")?,
        encrypted_encoding_aes_key: row.get("encrypted_encoding_aes_key")?,
        callback_enabled: enabled != 0,
        created_at: row.get("created_at")?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<ReceivedMessage> {
    let msg_type_raw: String = row.get("msg_type")?;
    let msg_type = msg_type_raw.parse::<MsgType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let is_reply: i64 = row.get("is_reply")?;
    let is_read: i64 = row.get("is_read")?;

    let quote = if is_reply != 0 {
        Some(QuotedMessage {
            quoted_msg_id: row.get("quote_msg_id")?,
            quoted_content: row.get("quote_content")?,
            quoted_from_user: row.get("quote_from_user")?,
            quoted_from_user_name: row.get("quote_from_user_name")?,
            quoted_msg_type: row.get("quote_msg_type")?,
        })
    } else {
        None
    };

    Ok(ReceivedMessage {
        message_id: row.get("message_id")?,
        config_code: row.get("config_code")?,
        from_user: row.get("from_user")?,
        from_user_name: row.get("from_user_name")?,
        to_user: row.get("to_user")?,
        agent_id: row.get("agent_id")?,
        msg_type,
        content: row.get("content")?,
        media_id: row.get("media_id")?,
        pic_url: row.get("pic_url")?,
        format: row.get("format")?,
        recognition: row.get("recognition")?,
        thumb_media_id: row.get("thumb_media_id")?,
        location_x: row.get("location_x")?,
        location_y: row.get("location_y")?,
        scale: row.get("scale")?,
        label: row.get("label")?,
        title: row.get("title")?,
        description: row.get("description")?,
        url: row.get("url")?,
        file_name: row.get("file_name")?,
        file_size: row.get("file_size")?,
        quote,
        event_type: row.get("event_type")?,
        event_key: row.get("event_key")?,
        create_time: row.get("create_time")?,
        created_time: row.get("created_time")?,
        created_date: row.get("created_date")?,
        is_reply: is_reply != 0,
        is_read: is_read != 0,
    })
}

impl ConfigStore for SqliteStore {
    fn get_by_code(&self, code: &str) -> Result<Option<Configuration>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM configurations WHERE code = ?1",
            params![code],
            row_to_configuration,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Get configuration error: {}", e)))
    }

    fn save(&self, config: &Configuration) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO configurations (code, corp_id, encrypted_corp_secret, agent_id, touser,
                description, callback_token, encrypted_encoding_aes_key, callback_enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(code) DO UPDATE SET
                corp_id = excluded.corp_id,
                encrypted_corp_secret = excluded.encrypted_corp_secret,
                agent_id = excluded.agent_id,
                touser = excluded.touser,
                description = excluded.description,
                callback_token = excluded.callback_token,
                encrypted_encoding_aes_key = excluded.encrypted_encoding_aes_key,
                callback_enabled = excluded.callback_enabled",
            params![
                config.code,
                config.corp_id,
                config.encrypted_corp_secret,
                config.agent_id,
                config.touser(),
                config.description,
                config.callback_token,
                config.encrypted_encoding_aes_key,
                config.callback_enabled as i64,
                config.created_at,
            ],
        )
        .map_err(|e| Error::Storage(format!("Save configuration error: {}", e)))?;

        debug!(code = %config.code, "Configuration saved");
        Ok(())
    }

    fn list(&self) -> Result<Vec<Configuration>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM configurations ORDER BY created_at ASC")
            .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;
        let rows = stmt
            .query_map([], row_to_configuration)
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(c) => out.push(c),
                Err(e) => warn!(error = %e, "Error reading configuration row"),
            }
        }
        Ok(out)
    }
}

/// WHERE clause plus bind values for a [`MessageQuery`].
fn build_where(query: &MessageQuery) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    let mut push = |clause: &str, value: Box<dyn rusqlite::types::ToSql>| {
        binds.push(value);
        clauses.push(clause.replace('?', &format!("?{}", binds.len())));
    };

    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

    if let Some(code) = non_empty(&query.config_code) {
        push("config_code = ?", Box::new(code));
    }
    if let Some(start) = non_empty(&query.start_date) {
        push("created_date >= ?", Box::new(start));
    }
    if let Some(end) = non_empty(&query.end_date) {
        push("created_date <= ?", Box::new(end));
    }
    if let Some(t) = query.msg_type {
        push("msg_type = ?", Box::new(t.as_str()));
    }
    if let Some(from) = non_empty(&query.from_user) {
        push("instr(from_user, ?) > 0", Box::new(from));
    }
    if let Some(to) = non_empty(&query.to_user) {
        push("instr(COALESCE(to_user, ''), ?) > 0", Box::new(to));
    }
    if let Some(kw) = non_empty(&query.keyword) {
        push("instr(COALESCE(content, ''), ?) > 0", Box::new(kw));
    }
    if let Some(read) = query.is_read {
        push("is_read = ?", Box::new(read as i64));
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, binds)
}

impl MessageStore for SqliteStore {
    fn upsert(&self, m: &ReceivedMessage) -> Result<()> {
        let conn = self.conn()?;
        let quote = m.quote.clone().unwrap_or_default();
        let received_at = Utc::now().to_rfc3339();

        // is_read is deliberately left out of the update set
        conn.execute(
            "INSERT INTO received_messages (
                message_id, config_code, from_user, from_user_name, to_user, agent_id, msg_type,
                content, media_id, pic_url, format, recognition, thumb_media_id,
                location_x, location_y, scale, label, title, description, url,
                file_name, file_size,
                quote_msg_id, quote_content, quote_from_user, quote_from_user_name, quote_msg_type,
                event_type, event_key, create_time, created_time, created_date,
                is_reply, is_read, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33,
                ?34, ?35)
             ON CONFLICT(message_id) DO UPDATE SET
                config_code = excluded.config_code,
                from_user = excluded.from_user,
                from_user_name = excluded.from_user_name,
                to_user = excluded.to_user,
                agent_id = excluded.agent_id,
                msg_type = excluded.msg_type,
                content = excluded.content,
                media_id = excluded.media_id,
                pic_url = excluded.pic_url,
                format = excluded.format,
                recognition = excluded.recognition,
                thumb_media_id = excluded.thumb_media_id,
                location_x = excluded.location_x,
                location_y = excluded.location_y,
                scale = excluded.scale,
                label = excluded.label,
                title = excluded.title,
                description = excluded.description,
                url = excluded.url,
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                quote_msg_id = excluded.quote_msg_id,
                quote_content = excluded.quote_content,
                quote_from_user = excluded.quote_from_user,
                quote_from_user_name = excluded.quote_from_user_name,
                quote_msg_type = excluded.quote_msg_type,
                event_type = excluded.event_type,
                event_key = excluded.event_key,
                create_time = excluded.create_time,
                created_time = excluded.created_time,
                created_date = excluded.created_date,
                is_reply = excluded.is_reply,
                received_at = excluded.received_at",
            params![
                m.message_id,
                m.config_code,
                m.from_user,
                m.from_user_name,
                m.to_user,
                m.agent_id,
                m.msg_type.as_str(),
                m.content,
                m.media_id,
                m.pic_url,
                m.format,
                m.recognition,
                m.thumb_media_id,
                m.location_x,
                m.location_y,
                m.scale,
                m.label,
                m.title,
                m.description,
                m.url,
                m.file_name,
                m.file_size,
                quote.quoted_msg_id,
                quote.quoted_content,
                quote.quoted_from_user,
                quote.quoted_from_user_name,
                quote.quoted_msg_type,
                m.event_type,
                m.event_key,
                m.create_time,
                m.created_time,
                m.created_date,
                m.quote.is_some() as i64,
                m.is_read as i64,
                received_at,
            ],
        )
        .map_err(|e| Error::Storage(format!("Upsert message error: {}", e)))?;

        debug!(message_id = %m.message_id, config_code = %m.config_code, "Message upserted");
        Ok(())
    }

    fn mark_read(&self, message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE received_messages SET is_read = 1 WHERE message_id = ?1",
                params![message_id],
            )
            .map_err(|e| Error::Storage(format!("Mark read error: {}", e)))?;
        Ok(changed > 0)
    }

    fn mark_read_many(&self, config_code: &str, message_ids: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Mark read error: {}", e)))?;
        let mut updated = 0;
        {
            let mut stmt = tx
                .prepare(
                    "UPDATE received_messages SET is_read = 1
                     WHERE message_id = ?1 AND config_code = ?2",
                )
                .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;
            for id in message_ids {
                updated += stmt
                    .execute(params![id, config_code])
                    .map_err(|e| Error::Storage(format!("Mark read error: {}", e)))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::Storage(format!("Mark read error: {}", e)))?;
        debug!(config_code, requested = message_ids.len(), updated, "Messages marked read");
        Ok(updated)
    }

    fn get(&self, message_id: &str) -> Result<Option<ReceivedMessage>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM received_messages WHERE message_id = ?1",
            params![message_id],
            row_to_message,
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Get message error: {}", e)))
    }

    fn query(&self, query: &MessageQuery) -> Result<MessagePage> {
        let conn = self.conn()?;
        let (where_sql, binds) = build_where(query);
        let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
            binds.iter().map(|b| b.as_ref()).collect();

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM received_messages{}", where_sql),
                bind_refs.as_slice(),
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Count error: {}", e)))?;

        let order = query.sort_order.as_sql();
        let sql = format!(
            "SELECT * FROM received_messages{} ORDER BY create_time {}, message_id {} LIMIT {} OFFSET {}",
            where_sql,
            order,
            order,
            query.limit(),
            query.offset()
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Storage(format!("Prepare error: {}", e)))?;
        let rows = stmt
            .query_map(bind_refs.as_slice(), row_to_message)
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;

        let mut messages = Vec::new();
        for row in rows {
            match row {
                Ok(m) => messages.push(m),
                Err(e) => warn!(error = %e, "Error reading message row"),
            }
        }

        Ok(MessagePage::new(messages, total.max(0) as u64, query))
    }

    fn stats(&self, config_code: &str) -> Result<MessageStats> {
        let conn = self.conn()?;
        let map_err = |e: rusqlite::Error| Error::Storage(format!("Stats error: {}", e));

        let (total, unread, replies, users, first, last): (
            i64,
            i64,
            i64,
            i64,
            Option<String>,
            Option<String>,
        ) = conn
            .query_row(
                "SELECT COUNT(*),
                        COUNT(CASE WHEN is_read = 0 THEN 1 END),
                        COUNT(CASE WHEN is_reply = 1 THEN 1 END),
                        COUNT(DISTINCT from_user),
                        MIN(created_time),
                        MAX(created_time)
                 FROM received_messages WHERE config_code = ?1",
                params![config_code],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .map_err(map_err)?;

        let mut stats = MessageStats {
            total_messages: total.max(0) as u64,
            unread_count: unread.max(0) as u64,
            reply_count: replies.max(0) as u64,
            user_count: users.max(0) as u64,
            first_message_time: first,
            last_message_time: last,
            ..Default::default()
        };

        let mut stmt = conn
            .prepare(
                "SELECT msg_type, COUNT(*) FROM received_messages
                 WHERE config_code = ?1 GROUP BY msg_type",
            )
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![config_code], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(map_err)?;
        for row in rows {
            let (t, n) = row.map_err(map_err)?;
            stats.by_type.insert(t, n.max(0) as u64);
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT created_date, COUNT(*) FROM received_messages
                 WHERE config_code = ?1 GROUP BY created_date
                 ORDER BY created_date DESC LIMIT {}",
                STATS_DATE_BUCKETS
            ))
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![config_code], |row| {
                Ok(DateCount {
                    date: row.get(0)?,
                    count: row.get::<_, i64>(1)?.max(0) as u64,
                })
            })
            .map_err(map_err)?;
        for row in rows {
            stats.by_date.push(row.map_err(map_err)?);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_configuration, sample_message};
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("relay.db");
        let store = SqliteStore::open(&db_path).unwrap();
        (store, dir)
    }

    #[test]
    fn test_configuration_save_and_get() {
        let (store, _dir) = test_store();
        let mut cfg = sample_configuration("wwCORP");
        store.save(&cfg).unwrap();

        let loaded = store.get_by_code(&cfg.code).unwrap().unwrap();
        assert_eq!(loaded, cfg);
        assert!(!loaded.is_complete());

        cfg.encrypted_corp_secret = Some("enc".to_string());
        cfg.agent_id = Some(1000002);
        cfg.recipients = vec!["alice".to_string(), "bob".to_string()];
        store.save(&cfg).unwrap();

        let loaded = store.get_by_code(&cfg.code).unwrap().unwrap();
        assert!(loaded.is_complete());
        assert_eq!(loaded.recipients, vec!["alice", "bob"]);
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.get_by_code("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (store, _dir) = test_store();
        let msg = sample_message("123", "cfg-a");
        store.upsert(&msg).unwrap();
        store.upsert(&msg).unwrap();

        let page = store.query(&MessageQuery::for_config("cfg-a")).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0], msg);
    }

    #[test]
    fn test_redelivery_overwrites_and_keeps_read_flag() {
        let (store, _dir) = test_store();
        let msg = sample_message("123", "cfg-a");
        store.upsert(&msg).unwrap();
        assert!(store.mark_read("123").unwrap());

        let mut changed = msg.clone();
        changed.content = Some("edited".to_string());
        store.upsert(&changed).unwrap();

        let stored = store.get("123").unwrap().unwrap();
        assert_eq!(stored.content.as_deref(), Some("edited"));
        assert!(stored.is_read);
        assert_eq!(store.query(&MessageQuery::default()).unwrap().total, 1);
    }

    #[test]
    fn test_mark_read_unknown_id() {
        let (store, _dir) = test_store();
        assert!(!store.mark_read("nope").unwrap());
    }

    #[test]
    fn test_mark_read_many_stays_within_config() {
        let (store, _dir) = test_store();
        store.upsert(&sample_message("a", "cfg-a")).unwrap();
        store.upsert(&sample_message("b", "cfg-a")).unwrap();
        store.upsert(&sample_message("c", "cfg-b")).unwrap();

        let ids = vec!["a".to_string(), "c".to_string(), "missing".to_string()];
        assert_eq!(store.mark_read_many("cfg-a", &ids).unwrap(), 1);

        assert!(store.get("a").unwrap().unwrap().is_read);
        assert!(!store.get("b").unwrap().unwrap().is_read);
        assert!(!store.get("c").unwrap().unwrap().is_read);
        assert_eq!(store.mark_read_many("cfg-a", &[]).unwrap(), 0);
    }

    #[test]
    fn test_quote_round_trip() {
        let (store, _dir) = test_store();
        let mut msg = sample_message("q1", "cfg-a");
        msg.quote = Some(QuotedMessage {
            quoted_msg_id: Some("99".to_string()),
            quoted_content: Some("earlier".to_string()),
            quoted_from_user: Some("bob".to_string()),
            quoted_from_user_name: None,
            quoted_msg_type: Some("text".to_string()),
        });
        msg.is_reply = true;
        store.upsert(&msg).unwrap();
        assert_eq!(store.get("q1").unwrap().unwrap(), msg);
    }

    #[test]
    fn test_query_filters_and_paging() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            let mut m = sample_message(&format!("m{}", i), "cfg-a");
            m.create_time = 1_700_000_000 + i;
            m.created_date = format!("2023-11-1{}", i);
            if i % 2 == 0 {
                m.msg_type = MsgType::Image;
                m.content = None;
            }
            store.upsert(&m).unwrap();
        }
        store.upsert(&sample_message("other", "cfg-b")).unwrap();

        let page = store
            .query(&MessageQuery {
                limit: Some(2),
                page: Some(2),
                ..MessageQuery::for_config("cfg-a")
            })
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        let ids: Vec<_> = page.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);

        let images = store
            .query(&MessageQuery {
                msg_type: Some(MsgType::Image),
                ..MessageQuery::for_config("cfg-a")
            })
            .unwrap();
        assert_eq!(images.total, 3);

        let ranged = store
            .query(&MessageQuery {
                start_date: Some("2023-11-11".to_string()),
                end_date: Some("2023-11-13".to_string()),
                sort_order: crate::store::SortOrder::Asc,
                ..MessageQuery::for_config("cfg-a")
            })
            .unwrap();
        let ids: Vec<_> = ranged.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);

        let keyword = store
            .query(&MessageQuery {
                keyword: Some("hel".to_string()),
                from_user: Some("ali".to_string()),
                ..MessageQuery::for_config("cfg-a")
            })
            .unwrap();
        assert_eq!(keyword.total, 2);
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = test_store();
        let mut a = sample_message("a", "cfg-a");
        a.created_date = "2023-11-14".to_string();
        let mut b = sample_message("b", "cfg-a");
        b.msg_type = MsgType::Event;
        b.from_user = "bob".to_string();
        b.created_date = "2023-11-15".to_string();
        store.upsert(&a).unwrap();
        store.upsert(&b).unwrap();
        store.mark_read("a").unwrap();

        let stats = store.stats("cfg-a").unwrap();
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.unread_count, 1);
        assert_eq!(stats.user_count, 2);
        assert_eq!(stats.by_type.get("text"), Some(&1));
        assert_eq!(stats.by_type.get("event"), Some(&1));
        assert_eq!(stats.by_date[0].date, "2023-11-15");

        assert_eq!(store.stats("empty").unwrap().total_messages, 0);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let (store, dir) = test_store();
        store.upsert(&sample_message("keep", "cfg-a")).unwrap();
        let path = store.db_path().to_path_buf();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get("keep").unwrap().is_some());
        drop(dir);
    }
}

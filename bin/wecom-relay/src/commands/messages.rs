use wecom_relay_core::MsgType;
use wecom_relay_storage::{MessageQuery, MessageStore, SortOrder};

use super::Context;

pub struct ListFilter {
    pub page: u32,
    pub limit: u32,
    pub msg_type: Option<String>,
    pub from_user: Option<String>,
    pub keyword: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub unread_only: bool,
    pub oldest_first: bool,
}

impl ListFilter {
    fn into_query(self, code: &str) -> anyhow::Result<MessageQuery> {
        let msg_type = match self.msg_type.as_deref() {
            Some(t) => Some(t.to_ascii_lowercase().parse::<MsgType>()?),
            None => None,
        };
        Ok(MessageQuery {
            config_code: Some(code.to_string()),
            start_date: self.start_date,
            end_date: self.end_date,
            msg_type,
            from_user: self.from_user,
            to_user: None,
            keyword: self.keyword,
            is_read: if self.unread_only { Some(false) } else { None },
            page: Some(self.page),
            limit: Some(self.limit),
            sort_order: if self.oldest_first { SortOrder::Asc } else { SortOrder::Desc },
        })
    }
}

fn preview(content: Option<&str>, max: usize) -> String {
    let text = content.unwrap_or("").replace('\n', " ");
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text,
    }
}

pub async fn list(code: &str, filter: ListFilter) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    let query = filter.into_query(code)?;
    let page = ctx.store.query(&query)?;

    if page.messages.is_empty() {
        println!("(No messages)");
        return Ok(());
    }

    for m in &page.messages {
        println!(
            "{} {} [{:<8}] {:<16} {}  ({})",
            if m.is_read { " " } else { "●" },
            m.created_time,
            m.msg_type.as_str(),
            m.sender_display(),
            preview(m.content.as_deref().or(m.title.as_deref()).or(m.event_type.as_deref()), 60),
            m.message_id
        );
    }
    println!();
    println!(
        "Page {}/{} · {} message(s)",
        page.page,
        page.total_pages.max(1),
        page.total
    );
    Ok(())
}

pub async fn read(message_id: &str) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    if ctx.store.mark_read(message_id)? {
        println!("✓ Marked {} as read", message_id);
    } else {
        anyhow::bail!("Message not found: {}", message_id);
    }
    Ok(())
}

pub async fn stats(code: &str) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    let stats = ctx.store.stats(code)?;

    println!();
    println!("📨 Messages for {}", code);
    println!("  Total:    {}", stats.total_messages);
    println!("  Unread:   {}", stats.unread_count);
    println!("  Replies:  {}", stats.reply_count);
    println!("  Senders:  {}", stats.user_count);
    if let (Some(first), Some(last)) = (&stats.first_message_time, &stats.last_message_time) {
        println!("  Range:    {} → {}", first, last);
    }
    if !stats.by_type.is_empty() {
        println!("  By type:");
        for (t, n) in &stats.by_type {
            println!("    {:<10} {}", t, n);
        }
    }
    if !stats.by_date.is_empty() {
        println!("  Recent days:");
        for d in stats.by_date.iter().take(7) {
            println!("    {} {}", d.date, d.count);
        }
    }
    println!();
    Ok(())
}

use wecom_relay_core::{Config, Paths};
use wecom_relay_storage::{ConfigStore, MessageStore, SqliteStore};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("wecom-relay status");
    println!("=================");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let config = Config::load_or_default(&paths)?;
    let db_path = config.db_path(&paths);
    println!(
        "Database:  {} {}",
        db_path.display(),
        if db_path.exists() { "✓" } else { "✗ (created on first use)" }
    );
    println!("Audit log: {}", paths.audit_dir().display());
    println!(
        "Gateway:   {}:{}{}",
        config.gateway.host,
        config.gateway.port,
        if config.gateway.api_token.is_some() { " (API token set)" } else { "" }
    );
    println!("Timezone:  {}", config.messages.display_timezone);
    match config.encryption_key() {
        Ok(_) => println!("Encryption key: ✓ configured"),
        Err(e) => println!("Encryption key: ✗ {}", e),
    }
    println!(
        "Sender names:   {}",
        if config.wecom.resolve_sender_names { "resolved via user/get" } else { "raw ids" }
    );

    if !db_path.exists() {
        return Ok(());
    }

    let store = SqliteStore::open(&db_path)?;
    let configs = store.list()?;
    println!();
    println!("Configurations: {}", configs.len());
    for c in configs {
        let stats = store.stats(&c.code)?;
        println!(
            "  {} {:<38} {:<20} {} message(s), {} unread",
            if c.is_complete() { "✓" } else { "◐" },
            c.code,
            c.corp_id,
            stats.total_messages,
            stats.unread_count
        );
    }
    Ok(())
}

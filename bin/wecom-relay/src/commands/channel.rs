use wecom_relay_channels::{decode_encoding_aes_key, Member, NotificationGateway};
use wecom_relay_core::Configuration;
use wecom_relay_storage::ConfigStore;

use super::Context;

fn mark(set: bool) -> &'static str {
    if set {
        "✓ set"
    } else {
        "✗ not set"
    }
}

/// Step 1: store callback credentials and print the callback URL.
pub async fn add(
    corp_id: &str,
    token: &str,
    encoding_aes_key: &str,
    description: Option<String>,
) -> anyhow::Result<()> {
    let corp_id = corp_id.trim();
    let token = token.trim();
    let encoding_aes_key = encoding_aes_key.trim();
    if corp_id.is_empty() || token.is_empty() {
        anyhow::bail!("corp id and token must not be empty");
    }
    decode_encoding_aes_key(encoding_aes_key).map_err(|e| anyhow::anyhow!("{}", e))?;

    let ctx = Context::load()?;
    let secrets = ctx.secrets()?;

    let mut config =
        Configuration::new_callback(corp_id, token, secrets.encrypt(encoding_aes_key)?);
    config.description = description.filter(|d| !d.trim().is_empty());
    ctx.store.save(&config)?;

    println!("✓ Configuration created");
    println!("  Code:         {}", config.code);
    println!(
        "  Callback URL: http://<your-host>:{}/callback/{}",
        ctx.config.gateway.port, config.code
    );
    println!();
    println!("Set this URL, the token and the EncodingAESKey under 接收消息 in the admin console,");
    println!("then run `wecom-relay channel complete {} ...` to enable sending.", config.code);
    Ok(())
}

/// Recipients that are not in the member list returned by `user/list`.
fn unknown_recipients<'a>(recipients: &'a [String], members: &[Member]) -> Vec<&'a str> {
    recipients
        .iter()
        .filter(|r| r.as_str() != "@all" && !members.iter().any(|m| &m.userid == *r))
        .map(String::as_str)
        .collect()
}

async fn fetch_members(ctx: &Context, corp_id: &str, corp_secret: &str) -> anyhow::Result<Vec<Member>> {
    let gateway = NotificationGateway::new(&ctx.config.wecom, ctx.store.clone(), ctx.secrets()?)?;
    Ok(gateway.validate_credentials(corp_id, corp_secret).await?)
}

pub async fn validate(corp_id: &str, corp_secret: &str) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    let members = fetch_members(&ctx, corp_id, corp_secret).await?;

    println!("✓ Credentials accepted, {} member(s) visible", members.len());
    for m in &members {
        println!("  {:<24} {}", m.userid, m.name);
    }
    Ok(())
}

/// Step 2: corpsecret, agent and recipients.
pub async fn complete(
    code: &str,
    corp_secret: &str,
    agent_id: i64,
    recipients: &str,
    description: Option<String>,
    verify: bool,
) -> anyhow::Result<()> {
    let recipients = Configuration::parse_recipients(recipients);
    if recipients.is_empty() {
        anyhow::bail!("at least one recipient is required");
    }
    if corp_secret.trim().is_empty() {
        anyhow::bail!("corp secret must not be empty");
    }

    let ctx = Context::load()?;
    let secrets = ctx.secrets()?;
    let mut config = ctx
        .store
        .get_by_code(code)?
        .ok_or_else(|| anyhow::anyhow!("Configuration not found: {}", code))?;

    if verify {
        let members = fetch_members(&ctx, &config.corp_id, corp_secret).await?;
        println!("✓ Credentials accepted, {} member(s) visible", members.len());
        let unknown = unknown_recipients(&recipients, &members);
        if !unknown.is_empty() {
            println!("⚠ Not in the member list: {}", unknown.join(", "));
        }
    }

    config.encrypted_corp_secret = Some(secrets.encrypt(corp_secret.trim())?);
    config.agent_id = Some(agent_id);
    config.recipients = recipients;
    if let Some(d) = description.filter(|d| !d.trim().is_empty()) {
        config.description = Some(d);
    }
    ctx.store.save(&config)?;

    println!("✓ Configuration {} can now send to {}", code, config.touser());
    Ok(())
}

pub async fn show(code: &str) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    let config = ctx
        .store
        .get_by_code(code)?
        .ok_or_else(|| anyhow::anyhow!("Configuration not found: {}", code))?;

    println!("Configuration {}", config.code);
    println!("  Corp ID:        {}", config.corp_id);
    println!("  Description:    {}", config.description.as_deref().unwrap_or("-"));
    println!("  Created:        {}", config.created_at);
    println!(
        "  Callback:       {}",
        if config.callback_enabled { "enabled" } else { "disabled" }
    );
    println!("  Token:          {}", mark(config.callback_token.is_some()));
    println!(
        "  EncodingAESKey: {}",
        mark(config.encrypted_encoding_aes_key.is_some())
    );
    println!("  Corp secret:    {}", mark(config.encrypted_corp_secret.is_some()));
    println!(
        "  Agent ID:       {}",
        config.agent_id.map(|a| a.to_string()).unwrap_or_else(|| "-".into())
    );
    println!(
        "  Recipients:     {}",
        if config.recipients.is_empty() { "-".to_string() } else { config.touser() }
    );
    if !config.is_complete() {
        println!();
        println!("⚠ Callback-only: run `wecom-relay channel complete {}` to enable sending.", code);
    }
    Ok(())
}

pub async fn list() -> anyhow::Result<()> {
    let ctx = Context::load()?;
    let configs = ctx.store.list()?;
    if configs.is_empty() {
        println!("(No configurations yet. Run `wecom-relay channel add`.)");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<9} {}", "CODE", "CORP ID", "SENDING", "DESCRIPTION");
    for c in configs {
        println!(
            "{:<38} {:<20} {:<9} {}",
            c.code,
            c.corp_id,
            if c.is_complete() { "yes" } else { "no" },
            c.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

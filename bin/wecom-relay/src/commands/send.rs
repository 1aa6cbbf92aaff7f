use std::sync::Arc;

use wecom_relay_channels::{NotificationGateway, NotifyMessage};
use wecom_relay_storage::AuditLogger;

use super::Context;

pub async fn run(code: &str, title: Option<String>, content: &str, markdown: bool) -> anyhow::Result<()> {
    let ctx = Context::load()?;
    let secrets = ctx.secrets()?;
    let audit = Arc::new(AuditLogger::new(ctx.paths.clone()));
    let gateway = NotificationGateway::new(&ctx.config.wecom, ctx.store.clone(), secrets)?
        .with_audit(audit);

    let receipt = if markdown {
        let body = match title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => format!("**{}**\n{}", t, content),
            None => content.to_string(),
        };
        gateway
            .send(code, &NotifyMessage::Markdown { content: body })
            .await?
    } else {
        gateway.send_text(code, title.as_deref(), content).await?
    };

    println!("✓ Sent ({} message(s))", receipt.chunks);
    if !receipt.invalid_users.is_empty() {
        println!("⚠ Unknown recipients: {}", receipt.invalid_users.join(", "));
    }
    Ok(())
}

//! Maintenance chores, run by hand.
//!
//! Usage: cargo run --bin maintenance <config.json> <start|done|sweep>
//!
//! `start` announces downtime to every registered group, `done` announces
//! the bot is back, `sweep` deletes conversation entries older than a day.

use teloxide::prelude::*;
use teloxide::types::ParseMode;

use xmsbot::config::Config;
use xmsbot::store::{ConversationStore, GroupRegistry, RemoteStore};

/// Conversation entries older than this are swept.
const SWEEP_MAX_AGE_SECS: i64 = 24 * 60 * 60;

const MAINTENANCE_MSG: &str = "🛠️ <b>MAINTENANCE MODE</b>\n\
    The bot is undergoing routine maintenance and upgrades.\n\n\
    ⏰ Estimated return: ±30 minutes (could be sooner or later)\n\
    💡 It will be faster and more stable after this!\n\n\
    We apologize for the inconvenience 🙏";

const DONE_MSG: &str = "✅ <b>MAINTENANCE COMPLETE</b>\n\n\
    The bot has finished routine maintenance and upgrades.\n\
    It can be used again as usual.\n\
    Thank you for your patience! 🙏";

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "xmsbot.json".to_string());
    let phase = args.next().unwrap_or_default();

    let message = match phase.as_str() {
        "start" => MAINTENANCE_MSG,
        "done" => DONE_MSG,
        "sweep" => "",
        _ => {
            eprintln!("Usage: maintenance <config.json> <start|done|sweep>");
            std::process::exit(2);
        }
    };

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let remote = config
        .remote_store
        .as_ref()
        .map(|rs| RemoteStore::new(rs.url.clone(), rs.api_key.clone()));

    if phase == "sweep" {
        let conversations = ConversationStore::new(
            config.data_dir.join("conversations.json"),
            remote,
            config.history_limit,
        );
        let removed = conversations.sweep_expired(SWEEP_MAX_AGE_SECS).await;
        println!("Swept {removed} expired conversation entries.");
        return;
    }

    let registry = GroupRegistry::new(config.data_dir.join("groups.json"), remote);

    let groups = registry.all().await;
    if groups.is_empty() {
        println!("No groups saved yet.");
        return;
    }

    let bot = Bot::new(&config.telegram_bot_token);
    let mut sent = 0;

    for (chat_id, title) in groups {
        match bot
            .send_message(ChatId(chat_id), message)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) => {
                println!("✅ Sent to {title} ({chat_id})");
                sent += 1;
            }
            Err(e) => println!("❌ Failed to send to {title} ({chat_id}): {e}"),
        }
    }

    println!("Done, {sent} group(s) notified.");
}

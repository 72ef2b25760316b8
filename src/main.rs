use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatKind};
use teloxide::utils::command::BotCommands;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use xmsbot::config::{Config, Provider};
use xmsbot::format::{split_message, strip_markdown, CHUNK_SIZE};
use xmsbot::llm::{GeminiClient, GroqClient, LlmClient, OllamaClient};
use xmsbot::modes::{self, Mode};
use xmsbot::search::SearchClient;
use xmsbot::store::{ConversationStore, GroupRegistry, ModeSettings, ModeDecision, RemoteStore, Role, UsageStore};

/// History entries sent along with a chat prompt.
const CHAT_HISTORY: usize = 10;
/// Informasi carries the search context too, so less history.
const INFORMASI_HISTORY: usize = 5;

struct BotState {
    config: Config,
    usage: UsageStore,
    conversations: ConversationStore,
    settings: ModeSettings,
    groups: GroupRegistry,
    llm: LlmClient,
    search: SearchClient,
    bot_user_id: i64,
    bot_username: Option<String>,
    /// Last prompt per user, for /reload.
    last_prompts: Mutex<HashMap<u64, String>>,
}

impl BotState {
    async fn new(config: Config, bot: &Bot) -> Self {
        // Get bot info
        let (bot_user_id, bot_username) = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                (me.id.0 as i64, Some(me.username().to_string()))
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                (0, None)
            }
        };

        let remote = config
            .remote_store
            .as_ref()
            .map(|rs| RemoteStore::new(rs.url.clone(), rs.api_key.clone()));
        if remote.is_some() {
            info!("Remote store enabled");
        }

        let usage = UsageStore::new(
            config.data_dir.join("users.json"),
            config.admin.clone(),
            config.request_ceiling,
            config.window_secs,
        );
        let conversations = ConversationStore::new(
            config.data_dir.join("conversations.json"),
            remote.clone(),
            config.history_limit,
        );
        let settings =
            ModeSettings::load(config.data_dir.join("settings.json"), remote.clone()).await;
        let groups = GroupRegistry::new(config.data_dir.join("groups.json"), remote);

        let llm = match config.provider {
            Provider::Gemini => LlmClient::Gemini(GeminiClient::new(config.gemini_api_key.clone())),
            Provider::Groq => LlmClient::Groq(GroqClient::new(config.groq_api_key.clone())),
            Provider::Ollama => LlmClient::Ollama(OllamaClient::new(
                config.ollama_url.clone(),
                config.ollama_model.clone(),
            )),
        };
        info!("LLM provider: {}", llm.name());

        Self {
            config,
            usage,
            conversations,
            settings,
            groups,
            llm,
            search: SearchClient::new(),
            bot_user_id,
            bot_username,
            last_prompts: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
enum Command {
    #[command(description = "welcome and usage overview")]
    Start,
    #[command(description = "how to use the bot")]
    Help,
    #[command(description = "unlimited access info")]
    Premium,
    #[command(description = "latency check")]
    Ping,
    #[command(description = "ask the model: /anu [halus|kasar|informasi] <prompt>")]
    Anu(String),
    #[command(description = "repeat the last prompt")]
    Reload,
    #[command(description = "reset mode and history")]
    Clear,
    #[command(description = "admin: disable a mode")]
    Off(String),
    #[command(description = "admin: enable a mode")]
    On(String),
    #[command(description = "mode availability")]
    Status,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "xmsbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("xmsbot.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting xmsbot...");
    info!("Loaded config from {config_path}");
    info!(
        "Limit: {} prompts / {} min, provider: {}",
        config.request_ceiling,
        config.window_secs / 60,
        config.provider.as_str()
    );

    let state = Arc::new(BotState::new(config, &bot).await);

    let handler = dptree::entry().branch(
        Update::filter_message()
            .branch(
                dptree::entry()
                    .filter_command::<Command>()
                    .endpoint(handle_command),
            )
            .branch(dptree::endpoint(handle_text)),
    );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn display_name(user: &teloxide::types::User) -> String {
    user.username
        .clone()
        .unwrap_or_else(|| user.first_name.clone())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start => cmd_start(bot, msg, state).await,
        Command::Help => cmd_help(bot, msg).await,
        Command::Premium => cmd_premium(bot, msg, state).await,
        Command::Ping => cmd_ping(bot, msg).await,
        Command::Anu(args) => cmd_anu(bot, msg, state, args).await,
        Command::Reload => cmd_reload(bot, msg, state).await,
        Command::Clear => cmd_clear(bot, msg, state).await,
        Command::Off(args) => cmd_toggle_mode(bot, msg, state, args, true).await,
        Command::On(args) => cmd_toggle_mode(bot, msg, state, args, false).await,
        Command::Status => cmd_status(bot, msg, state).await,
    }
}

async fn cmd_start(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let current_mode = match msg.from {
        Some(ref user) => state
            .conversations
            .get(&user.id.to_string())
            .await
            .mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "not picked yet".to_string()),
        None => "not picked yet".to_string(),
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "👋 Hi! I'm an AI bot with 3 modes:\n\
             😇 halus - polite assistant\n\
             😈 kasar - blunt assistant\n\
             🔍 informasi - web search + summary\n\n\
             📋 Usage:\n\
             /anu halus <prompt>\n\
             /anu kasar <prompt>\n\
             /anu informasi <query>\n\
             /clear - reset mode & history\n\n\
             Your mode: {current_mode}\n\
             📌 Limit: {} prompts / {} minutes",
            state.config.request_ceiling,
            state.config.window_secs / 60
        ),
    )
    .await?;
    Ok(())
}

async fn cmd_help(bot: Bot, msg: Message) -> ResponseResult<()> {
    bot.send_message(
        msg.chat.id,
        "📖 How to use:\n\n\
         MODES:\n\
         /anu halus <prompt> - polite mode 😇\n\
         /anu kasar <prompt> - blunt mode 😈\n\
         /anu informasi <query> - fresh info 🔍\n\
         /anu <prompt> - continue in your locked mode\n\n\
         COMMANDS:\n\
         /clear - reset mode & history\n\
         /reload - repeat the last prompt\n\
         /premium - unlimited access\n\n\
         In groups: tag @bot or reply to my message.",
    )
    .await?;
    Ok(())
}

async fn cmd_premium(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    bot.send_message(
        msg.chat.id,
        format!(
            "💰 For unlimited access, DM {} with your request.",
            state.config.admin
        ),
    )
    .await?;
    Ok(())
}

async fn cmd_ping(bot: Bot, msg: Message) -> ResponseResult<()> {
    let started = Instant::now();
    let sent = bot.send_message(msg.chat.id, "🏓 Pinging...").await?;
    let latency_ms = started.elapsed().as_millis();

    bot.edit_message_text(
        msg.chat.id,
        sent.id,
        format!("🏓 PONG!\n⚡ Latency: {latency_ms} ms"),
    )
    .await?;
    Ok(())
}

async fn cmd_anu(bot: Bot, msg: Message, state: Arc<BotState>, args: String) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let identity = user.id.to_string();
    let name = display_name(&user);
    let args = args.trim().to_string();

    if args.is_empty() {
        let current_mode = state
            .conversations
            .get(&identity)
            .await
            .mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "not set".to_string());
        bot.send_message(
            msg.chat.id,
            format!(
                "💬 Usage:\n\n\
                 /anu halus <prompt> - polite mode\n\
                 /anu kasar <prompt> - blunt mode\n\
                 /anu informasi <query> - fresh info 🔍\n\
                 /anu <prompt> - continue in your current mode\n\n\
                 Your current mode: {current_mode}\n\
                 Use /clear to reset it."
            ),
        )
        .await?;
        return Ok(());
    }

    if !check_admission(&bot, &msg, &state, &identity, &name).await? {
        return Ok(());
    }

    remember_group(&msg, &state).await;

    // Pick up /off /on changes from other instances before gating.
    state.settings.refresh().await;

    // A leading mode word selects (and locks) the mode; anything else is
    // the prompt for the already locked one.
    let mut parts = args.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    let explicit = Mode::parse(first);

    let mode = if let Some(mode) = explicit {
        if state.settings.is_disabled(mode) {
            bot.send_message(
                msg.chat.id,
                format!(
                    "🔴 Mode '{mode}' has been disabled by {}.\nPlease use another mode.",
                    state.config.admin
                ),
            )
            .await?;
            return Ok(());
        }

        match state.conversations.try_set_mode(&identity, mode, &name).await {
            ModeDecision::Set | ModeDecision::Unchanged => {}
            ModeDecision::Conflict(current) => {
                bot.send_message(
                    msg.chat.id,
                    format!(
                        "⚠️ Your mode is already locked to '{current}'.\n\
                         Use /clear first to switch."
                    ),
                )
                .await?;
                return Ok(());
            }
        }

        if rest.is_empty() {
            bot.send_message(
                msg.chat.id,
                format!("💬 Mode {mode} active! Now send the prompt:\n/anu {mode} <question>"),
            )
            .await?;
            return Ok(());
        }

        mode
    } else {
        let Some(mode) = state.conversations.get(&identity).await.mode else {
            bot.send_message(
                msg.chat.id,
                "⚠️ You haven't picked a mode yet!\n\n\
                 Pick one first:\n\
                 /anu halus <prompt> - polite mode\n\
                 /anu kasar <prompt> - blunt mode\n\
                 /anu informasi <query> - fresh info",
            )
            .await?;
            return Ok(());
        };
        if state.settings.is_disabled(mode) {
            bot.send_message(
                msg.chat.id,
                format!(
                    "🔴 Mode '{mode}' has been disabled by {}.\n\
                     Use /clear to reset and pick another mode.",
                    state.config.admin
                ),
            )
            .await?;
            return Ok(());
        }
        mode
    };

    let prompt = if explicit.is_some() { rest } else { args.as_str() };

    state
        .last_prompts
        .lock()
        .await
        .insert(user.id.0, prompt.to_string());

    respond(&bot, &msg, &state, &identity, &name, mode, prompt).await
}

async fn cmd_reload(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let identity = user.id.to_string();
    let name = display_name(&user);

    let Some(prompt) = state.last_prompts.lock().await.get(&user.id.0).cloned() else {
        bot.send_message(msg.chat.id, "No previous prompt to repeat.")
            .await?;
        return Ok(());
    };

    let Some(mode) = state.conversations.get(&identity).await.mode else {
        bot.send_message(msg.chat.id, "⚠️ Pick a mode first with /anu halus or /anu kasar.")
            .await?;
        return Ok(());
    };

    if !check_admission(&bot, &msg, &state, &identity, &name).await? {
        return Ok(());
    }

    bot.send_message(msg.chat.id, "🔄 Repeating the last prompt...")
        .await?;
    respond(&bot, &msg, &state, &identity, &name, mode, &prompt).await
}

async fn cmd_clear(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let identity = user.id.to_string();
    let name = display_name(&user);

    let cleared = state.conversations.clear(&identity).await;
    let old_mode = cleared
        .mode
        .map(|m| m.to_string())
        .unwrap_or_else(|| "none".to_string());

    bot.send_message(
        msg.chat.id,
        format!(
            "🗑️ Conversation cleared!\n\n\
             👤 User: @{name}\n\
             🆔 ID: {identity}\n\
             📁 Previous mode: {old_mode}\n\n\
             You can pick a new mode with /anu halus or /anu kasar."
        ),
    )
    .await?;
    Ok(())
}

async fn cmd_toggle_mode(
    bot: Bot,
    msg: Message,
    state: Arc<BotState>,
    args: String,
    disable: bool,
) -> ResponseResult<()> {
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };
    let name = display_name(&user);

    if !state.config.is_admin(&name) {
        bot.send_message(msg.chat.id, "❌ Only the admin can use this command.")
            .await?;
        return Ok(());
    }

    let verb = if disable { "/off" } else { "/on" };
    let args = args.trim();
    if args.is_empty() {
        let disabled = state.settings.disabled();
        let disabled = if disabled.is_empty() {
            "none".to_string()
        } else {
            disabled
                .iter()
                .map(Mode::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        bot.send_message(
            msg.chat.id,
            format!(
                "Usage: {verb} halus|kasar|informasi\n\
                 Currently disabled: {disabled}"
            ),
        )
        .await?;
        return Ok(());
    }

    let Some(mode) = Mode::parse(args) else {
        bot.send_message(
            msg.chat.id,
            "❌ Invalid mode. Pick one of: halus, kasar, informasi",
        )
        .await?;
        return Ok(());
    };

    if disable {
        if state.settings.disable(mode).await {
            info!("🔒 Mode '{mode}' disabled by admin");
            bot.send_message(
                msg.chat.id,
                format!(
                    "🔒 Mode '{mode}' DISABLED!\n\
                     Users can't run /anu {mode} until it's re-enabled with /on {mode}."
                ),
            )
            .await?;
        } else {
            bot.send_message(msg.chat.id, format!("⚠️ Mode '{mode}' is already disabled."))
                .await?;
        }
    } else if state.settings.enable(mode).await {
        info!("🔓 Mode '{mode}' enabled by admin");
        bot.send_message(
            msg.chat.id,
            format!("🔓 Mode '{mode}' ENABLED!\nUsers can run /anu {mode} again."),
        )
        .await?;
    } else {
        bot.send_message(msg.chat.id, format!("⚠️ Mode '{mode}' is already enabled."))
            .await?;
    }
    Ok(())
}

async fn cmd_status(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    state.settings.refresh().await;

    let lines: Vec<String> = Mode::ALL
        .into_iter()
        .map(|mode| {
            if state.settings.is_disabled(mode) {
                format!("🔴 {mode} - disabled")
            } else {
                format!("🟢 {mode} - active")
            }
        })
        .collect();

    bot.send_message(
        msg.chat.id,
        format!(
            "📊 Bot status:\n\n{}\n\n⚙️ Provider: {}",
            lines.join("\n"),
            state.llm.name()
        ),
    )
    .await?;
    Ok(())
}

/// Plain messages answer only when the bot is tagged or replied to.
async fn handle_text(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    // Unrecognized commands fall through to this handler; ignore them.
    if text.starts_with('/') {
        return Ok(());
    }
    let Some(user) = msg.from.clone() else {
        return Ok(());
    };

    let mention = state
        .bot_username
        .as_ref()
        .map(|u| format!("@{u}"))
        .unwrap_or_default();
    let is_mentioned = !mention.is_empty() && text.contains(&mention);
    let is_reply = msg
        .reply_to_message()
        .and_then(|reply| reply.from.as_ref())
        .map(|u| u.id.0 as i64 == state.bot_user_id)
        .unwrap_or(false);

    if !(is_mentioned || is_reply) {
        return Ok(());
    }

    let identity = user.id.to_string();
    let name = display_name(&user);

    if !check_admission(&bot, &msg, &state, &identity, &name).await? {
        return Ok(());
    }

    remember_group(&msg, &state).await;
    state.settings.refresh().await;

    let Some(mode) = state.conversations.get(&identity).await.mode else {
        bot.send_message(
            msg.chat.id,
            "⚠️ You haven't picked a mode yet!\n\n\
             Pick one first:\n\
             /anu halus <prompt> - polite mode 😇\n\
             /anu kasar <prompt> - blunt mode 😈",
        )
        .await?;
        return Ok(());
    };
    if state.settings.is_disabled(mode) {
        bot.send_message(
            msg.chat.id,
            format!(
                "🔴 Mode '{mode}' has been disabled by {}.\n\
                 Use /clear to reset and pick another mode.",
                state.config.admin
            ),
        )
        .await?;
        return Ok(());
    }

    let prompt = text.replace(&mention, "").trim().to_string();
    if prompt.is_empty() {
        return Ok(());
    }

    state
        .last_prompts
        .lock()
        .await
        .insert(user.id.0, prompt.clone());

    respond(&bot, &msg, &state, &identity, &name, mode, &prompt).await
}

/// Rate-limit gate; sends the denial message itself.
async fn check_admission(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    identity: &str,
    name: &str,
) -> ResponseResult<bool> {
    let admission = state.usage.check_and_consume(identity, name);
    if !admission.allowed {
        info!("Rate limit hit for {name} ({identity})");
        bot.send_message(
            msg.chat.id,
            format!(
                "⚠️ Limit of {} prompts / {} minutes reached.\nType /premium to upgrade.",
                state.config.request_ceiling,
                state.config.window_secs / 60
            ),
        )
        .await?;
        return Ok(false);
    }
    Ok(true)
}

/// Save group chats for maintenance broadcasts.
async fn remember_group(msg: &Message, state: &BotState) {
    if matches!(msg.chat.kind, ChatKind::Public(_)) {
        let title = msg.chat.title().unwrap_or("(untitled)");
        state.groups.record(msg.chat.id.0, title).await;
    }
}

/// Run one admitted prompt: gather context, call the provider, store the
/// exchange and send the reply.
async fn respond(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    identity: &str,
    name: &str,
    mode: Mode,
    prompt: &str,
) -> ResponseResult<()> {
    bot.send_chat_action(msg.chat.id, ChatAction::Typing)
        .await
        .ok();

    let preview: String = prompt.chars().take(100).collect();
    info!("Prompt from {name} ({identity}) in mode {mode}: \"{preview}\"");

    let answer = if mode == Mode::Informasi {
        let context = match state.search.search(prompt).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Search failed: {e}");
                format!("The web search failed ({e}). Say so and answer from general knowledge.")
            }
        };
        let system = modes::informasi_prompt(&context) + &modes::user_context(name, identity);
        let history = state
            .conversations
            .recent_history(identity, INFORMASI_HISTORY)
            .await;
        state.llm.complete(mode, &system, &history, prompt).await
    } else {
        let system = format!("{}{}", mode.persona(), modes::user_context(name, identity));
        let history = state
            .conversations
            .recent_history(identity, CHAT_HISTORY)
            .await;
        state.llm.complete(mode, &system, &history, prompt).await
    };

    match answer {
        Ok(reply) => {
            state.conversations.append(identity, Role::User, prompt).await;
            state
                .conversations
                .append(identity, Role::Assistant, &reply)
                .await;

            let text = strip_markdown(&reply);
            for part in split_message(&text, CHUNK_SIZE) {
                bot.send_message(msg.chat.id, part).await?;
            }
        }
        Err(e) => {
            warn!("LLM call failed: {e}");
            bot.send_message(msg.chat.id, format!("🤖 Sorry, something went wrong: {e}"))
                .await?;
        }
    }

    Ok(())
}

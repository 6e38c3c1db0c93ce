//! vpsphere-whoami: replies to `/start` with the sender's Telegram id, for
//! filling in `USER_ID`.

use clap::Parser;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "vpsphere-whoami", version, about = "Tell Telegram users their numeric id")]
struct Cli {
    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    token: String,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("whoami bot running, send /start to it");
    let bot = Bot::new(cli.token);
    let handler = Update::filter_message().endpoint(|bot: Bot, msg: Message| async move {
        if msg.text().is_some_and(|t| t.trim_start().starts_with("/start")) {
            if let Some(user) = msg.from.as_ref() {
                bot.send_message(msg.chat.id, reply_for(user.id.0))
                    .parse_mode(ParseMode::MarkdownV2)
                    .await?;
            }
        }
        Ok::<(), teloxide::RequestError>(())
    });

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn reply_for(id: u64) -> String {
    format!("🆔 Your Telegram ID is: `{id}`")
}

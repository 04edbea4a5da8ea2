use crate::config::BotSettings;
use crate::convert;
use crate::transport::TelegramTransport;
use anyhow::{Context, Result};
use ibuddy_core::event::{Actor, InboundEvent};
use ibuddy_core::llm::OpenAiProvider;
use ibuddy_core::pipeline::{Pipeline, Services};
use ibuddy_core::storage::{self, StorageProvider};
use ibuddy_core::voice::VoicePipeline;
use ibuddy_core::worker::WorkerPool;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Me};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the Telegram transport runtime until Ctrl-C.
///
/// # Errors
///
/// Returns an error if storage, the backend client or the bot identity
/// cannot be initialized.
pub async fn run_bot(settings: Arc<BotSettings>) -> Result<()> {
    let storage = init_storage(&settings).await?;

    let llm = Arc::new(
        OpenAiProvider::new(&settings.core).context("Failed to initialize OpenAI provider")?,
    );
    info!("LLM provider initialized.");

    let bot = init_bot(&settings);
    let me = bot.get_me().await.context("Failed to fetch bot identity")?;
    info!(bot = %me.username(), "Bot identity resolved.");

    let services = Services {
        storage,
        transport: Arc::new(TelegramTransport::new(bot.clone(), bot_actor(&me))),
        llm,
        settings: settings.core.clone(),
    };
    let voice = VoicePipeline::from_settings(&services);
    let pipeline = Arc::new(Pipeline::standard(&services, voice));

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(settings.core.worker_count, pipeline, shutdown.clone());

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![pool.sender()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, shutting down workers.");
    pool.shutdown().await;
    Ok(())
}

fn init_bot(settings: &BotSettings) -> Bot {
    let bot = Bot::new(settings.telegram.telegram_token.clone());
    match settings
        .telegram
        .telegram_api_url
        .as_deref()
        .map(reqwest::Url::parse)
    {
        Some(Ok(url)) => bot.set_api_url(url),
        Some(Err(e)) => {
            warn!("Ignoring invalid telegram_api_url: {}", e);
            bot
        }
        None => bot,
    }
}

async fn init_storage(settings: &BotSettings) -> Result<Arc<dyn StorageProvider>> {
    let storage = storage::from_settings(&settings.core)
        .await
        .context("Failed to initialize storage")?;
    info!(backend = ?settings.core.storage_backend, "Storage initialized.");
    if let Err(e) = storage.check_connection().await {
        error!("Storage connection check returned error: {}", e);
    }
    Ok(storage)
}

fn bot_actor(me: &Me) -> Actor {
    Actor {
        is_bot: true,
        ..convert::actor(&me.user)
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(enqueue_callback))
        .branch(Update::filter_message().endpoint(enqueue_message))
}

async fn enqueue(queue: &mpsc::Sender<InboundEvent>, event: InboundEvent) {
    if queue.send(event).await.is_err() {
        warn!("Worker queue closed, dropping update");
    }
}

async fn enqueue_message(
    msg: Message,
    queue: mpsc::Sender<InboundEvent>,
) -> Result<(), teloxide::RequestError> {
    match convert::message(&msg) {
        Some(event) => enqueue(&queue, InboundEvent::Message(event)).await,
        None => info!(chat_id = msg.chat.id.0, "Ignoring message without sender"),
    }
    respond(())
}

async fn enqueue_callback(
    q: CallbackQuery,
    queue: mpsc::Sender<InboundEvent>,
) -> Result<(), teloxide::RequestError> {
    enqueue(&queue, InboundEvent::Callback(convert::callback(&q))).await;
    respond(())
}

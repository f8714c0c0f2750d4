//! Telegram wiring: teloxide dispatcher, update routing and the
//! [`Conversation`] implementation over the Bot API.

use crate::delivery::{Conversation, MessageRef};
use crate::handlers::{Attachment, OcrService};
use crate::store::{email_callback_data, parse_email_callback};
use anyhow::Result;
use std::sync::Arc;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "Start the bot")]
    Start,
    #[command(description = "Get help information")]
    Help,
}

/// One Telegram chat.
pub struct TelegramConversation {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramConversation {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait::async_trait]
impl Conversation for TelegramConversation {
    async fn send_text(&self, text: &str) -> Result<MessageRef> {
        let message = self.bot.send_message(self.chat_id, text).await?;
        Ok(message.id.0)
    }

    async fn send_email_offer(&self, text: &str, extraction_id: &str) -> Result<MessageRef> {
        let keyboard = InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
            "Send to Email",
            email_callback_data(extraction_id),
        )]]);

        let message = self
            .bot
            .send_message(self.chat_id, text)
            .reply_markup(keyboard)
            .await?;
        Ok(message.id.0)
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.bot.delete_message(self.chat_id, MessageId(message)).await?;
        Ok(())
    }

    async fn clear_buttons(&self, message: MessageRef) -> Result<()> {
        // No reply_markup on the edit removes the keyboard.
        self.bot
            .edit_message_reply_markup(self.chat_id, MessageId(message))
            .await?;
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self.bot.get_file(file_id.to_string()).await?;
        let mut data = Vec::with_capacity(file.size as usize);
        self.bot.download_file(&file.path, &mut data).await?;
        debug!("Downloaded {} ({} bytes)", file_id, data.len());
        Ok(data)
    }
}

/// Run long polling until Ctrl-C.
pub async fn run(bot: Bot, service: Arc<OcrService>) {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(dptree::endpoint(handle_message)),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    info!("Starting long polling");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![service])
        .default_handler(|update| async move {
            debug!("Unhandled update: {:?}", update.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    service: Arc<OcrService>,
) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let conversation = TelegramConversation::new(bot, msg.chat.id);

    match cmd {
        Command::Start => service.start(user.id.0, &conversation).await,
        Command::Help => service.help(user.id.0, &conversation).await,
    }
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, service: Arc<OcrService>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };

    let attachment = if let Some(sizes) = msg.photo() {
        // Sizes are ordered smallest first.
        match sizes.last() {
            Some(largest) => Attachment::Photo {
                file_id: largest.file.id.to_string(),
            },
            None => return Ok(()),
        }
    } else if let Some(document) = msg.document() {
        Attachment::Document {
            file_id: document.file.id.to_string(),
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.as_ref().map(|m| m.essence_str().to_string()),
        }
    } else {
        debug!("Ignoring message {} without attachment", msg.id.0);
        return Ok(());
    };

    info!("Attachment from user {} in chat {}", user.id.0, msg.chat.id);
    let conversation = TelegramConversation::new(bot, msg.chat.id);
    service
        .handle_attachment(user.id.0, &conversation, attachment)
        .await;
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    service: Arc<OcrService>,
) -> ResponseResult<()> {
    // Only stops the button's spinner; the email goes out regardless.
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        warn!("Failed to answer callback query {}: {}", query.id, e);
    }

    let Some(extraction_id) = query.data.as_deref().and_then(parse_email_callback) else {
        debug!("Ignoring callback {:?}", query.data);
        return Ok(());
    };

    let (chat_id, button_message) = match query.message.as_ref() {
        Some(message) => (message.chat().id, Some(message.id().0)),
        None => (ChatId::from(query.from.id), None),
    };

    let conversation = TelegramConversation::new(bot, chat_id);
    service
        .handle_email_request(query.from.id.0, &conversation, button_message, extraction_id)
        .await;
    Ok(())
}

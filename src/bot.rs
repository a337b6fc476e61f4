//! Discord event handler and the Discord-backed transport

use crate::audio::ProcessRunner;
use crate::cleanup::CleanupScheduler;
use crate::config::Config;
use crate::database::Database;
use crate::engine::Engine;
use crate::transport::{
    parse_start_command, Action, Content, Controls, Destination, FileRef, Inbound, InboundKind,
    Media, MessageRef, Outbound, Sender, Tone, Transport, TransportError,
};
use serenity::all::{
    Attachment, ButtonStyle, ChannelId, Client, Command, CommandInteraction, CommandOptionType,
    ComponentInteraction, Context, CreateActionRow, CreateAttachment, CreateButton, CreateCommand,
    CreateCommandOption, CreateInteractionResponse, CreateInteractionResponseMessage,
    CreateMessage, EditMessage, EventHandler, GatewayIntents, GuildId, Http, Interaction, Message,
    MessageId, Ready, ResolvedValue, UserId,
};
use serenity::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Discord rejects longer message bodies
const MAX_CONTENT: usize = 2000;
const EVENT_QUEUE: usize = 256;

/// Gateway handler; normalizes events and queues them for the engine
pub struct Handler {
    pub config: Arc<Config>,
    pub events: mpsc::Sender<Inbound>,
}

impl Handler {
    async fn enqueue(&self, event: Inbound) {
        if let Err(e) = self.events.send(event).await {
            error!("Event queue closed: {}", e);
        }
    }
}

fn register() -> Vec<CreateCommand> {
    vec![CreateCommand::new("start")
        .description("Open the Frosted Mirror menu in your DMs")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "param",
                "Link parameter from a public post",
            )
            .required(false),
        )]
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Logged in as {}", ready.user.name);

        // If guild ID is set, register to specific guild (faster for dev)
        if let Some(guild_id) = self.config.guild_id {
            let guild = GuildId::new(guild_id);
            match guild.set_commands(&ctx.http, register()).await {
                Ok(cmds) => info!("Registered {} guild commands", cmds.len()),
                Err(e) => error!("Failed to register guild commands: {}", e),
            }
        } else {
            match Command::set_global_commands(&ctx.http, register()).await {
                Ok(cmds) => info!("Registered {} global commands", cmds.len()),
                Err(e) => error!("Failed to register global commands: {}", e),
            }
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        // Only direct conversations with humans drive flows
        if msg.author.bot || msg.guild_id.is_some() {
            return;
        }
        let sender = Sender {
            id: msg.author.id.get(),
            display_name: msg.author.name.clone(),
        };
        self.enqueue(Inbound {
            sender,
            kind: message_kind(&msg),
        })
        .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Component(component) => self.on_component(&ctx, component).await,
            Interaction::Command(command) if command.data.name == "start" => {
                self.on_start(&ctx, command).await
            }
            _ => {}
        }
    }
}

impl Handler {
    async fn on_component(&self, ctx: &Context, component: ComponentInteraction) {
        if let Err(e) = component
            .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
            .await
        {
            warn!("Failed to acknowledge button: {}", e);
        }

        let Some(action) = Action::parse(&component.data.custom_id) else {
            debug!(custom_id = %component.data.custom_id, "Unknown button");
            return;
        };
        let origin = MessageRef {
            channel_id: component.channel_id.get(),
            message_id: component.message.id.get(),
        };
        self.enqueue(Inbound {
            sender: Sender {
                id: component.user.id.get(),
                display_name: component.user.name.clone(),
            },
            kind: InboundKind::Action {
                action,
                origin: Some(origin),
            },
        })
        .await;
    }

    async fn on_start(&self, ctx: &Context, command: CommandInteraction) {
        let param = command
            .data
            .options()
            .into_iter()
            .find(|o| o.name == "param")
            .and_then(|o| match o.value {
                ResolvedValue::String(s) => Some(s.to_string()),
                _ => None,
            });

        let reply = CreateInteractionResponseMessage::new()
            .content("📬 Check your direct messages!")
            .ephemeral(true);
        if let Err(e) = command
            .create_response(&ctx.http, CreateInteractionResponse::Message(reply))
            .await
        {
            warn!("Failed to respond to /start: {}", e);
        }

        self.enqueue(Inbound {
            sender: Sender {
                id: command.user.id.get(),
                display_name: command.user.name.clone(),
            },
            kind: InboundKind::Start(param),
        })
        .await;
    }
}

fn message_kind(msg: &Message) -> InboundKind {
    if let Some(param) = parse_start_command(&msg.content) {
        return InboundKind::Start(param);
    }
    if let Some(action) = Action::from_text(&msg.content) {
        return InboundKind::Action {
            action,
            origin: None,
        };
    }
    match msg.attachments.first() {
        Some(attachment) => InboundKind::Content(attachment_content(attachment, &msg.content)),
        None => InboundKind::Content(Content::Text(msg.content.clone())),
    }
}

fn attachment_content(attachment: &Attachment, text: &str) -> Content {
    let file = FileRef(attachment.url.clone());
    let content_type = attachment.content_type.as_deref().unwrap_or_default();
    if content_type.starts_with("audio/") {
        // Duration is probed from the clip itself
        Content::Voice {
            file,
            duration: None,
        }
    } else if content_type.starts_with("image/") {
        Content::Photo {
            file,
            caption: (!text.trim().is_empty()).then(|| text.to_string()),
        }
    } else {
        Content::Document {
            file,
            name: attachment.filename.clone(),
        }
    }
}

/// [`Transport`] over the Discord REST API
pub struct DiscordTransport {
    http: Arc<Http>,
    client: reqwest::Client,
    moderation: ChannelId,
    public: ChannelId,
}

impl DiscordTransport {
    pub fn new(http: Arc<Http>, config: &Config) -> Self {
        Self {
            http,
            client: reqwest::Client::new(),
            moderation: ChannelId::new(config.moderation_channel_id),
            public: ChannelId::new(config.public_channel_id),
        }
    }

    async fn channel(&self, to: Destination) -> Result<ChannelId, TransportError> {
        match to {
            Destination::Moderation => Ok(self.moderation),
            Destination::Public => Ok(self.public),
            Destination::User(user_id) => {
                let dm = UserId::new(user_id)
                    .create_dm_channel(&self.http)
                    .await
                    .map_err(platform)?;
                Ok(dm.id)
            }
        }
    }

    async fn attachment(&self, media: &Media) -> Result<CreateAttachment, TransportError> {
        let (file, name) = match media {
            Media::Voice(file) => (file, "voice.ogg".to_string()),
            Media::Photo(file) => (file, file_name(file, "photo.jpg")),
            Media::Document { file, name } => (file, name.clone()),
        };
        let bytes = self.fetch_file(file).await?;
        Ok(CreateAttachment::bytes(bytes, name))
    }
}

fn platform(e: serenity::Error) -> TransportError {
    TransportError::Platform(e.to_string())
}

fn file_name(file: &FileRef, fallback: &str) -> String {
    file.0
        .split('?')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CONTENT {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_CONTENT - 1).collect();
    clipped.push('…');
    clipped
}

fn components(controls: &Controls) -> Vec<CreateActionRow> {
    controls
        .rows
        .iter()
        .map(|row| {
            CreateActionRow::Buttons(
                row.iter()
                    .map(|button| {
                        CreateButton::new(button.action.tag())
                            .label(button.label.clone())
                            .style(match button.tone {
                                Tone::Primary => ButtonStyle::Primary,
                                Tone::Secondary => ButtonStyle::Secondary,
                                Tone::Success => ButtonStyle::Success,
                                Tone::Danger => ButtonStyle::Danger,
                            })
                    })
                    .collect(),
            )
        })
        .collect()
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn send(&self, to: Destination, message: Outbound) -> Result<MessageRef, TransportError> {
        let channel = self.channel(to).await?;
        let mut builder = CreateMessage::new()
            .content(clip(&message.text))
            .components(components(&message.controls));
        if let Some(media) = &message.media {
            builder = builder.add_file(self.attachment(media).await?);
        }
        let sent = channel
            .send_message(&self.http, builder)
            .await
            .map_err(platform)?;
        Ok(MessageRef {
            channel_id: sent.channel_id.get(),
            message_id: sent.id.get(),
        })
    }

    async fn edit(
        &self,
        target: MessageRef,
        text: Option<String>,
        controls: Controls,
    ) -> Result<(), TransportError> {
        let mut builder = EditMessage::new().components(components(&controls));
        if let Some(text) = text {
            builder = builder.content(clip(&text));
        }
        ChannelId::new(target.channel_id)
            .edit_message(&self.http, MessageId::new(target.message_id), builder)
            .await
            .map_err(platform)?;
        Ok(())
    }

    async fn fetch_file(&self, file: &FileRef) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .get(&file.0)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TransportError::Download(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Download(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn upload_voice(&self, bytes: Vec<u8>, caption: String) -> Result<FileRef, TransportError> {
        // The moderation channel doubles as storage for processed clips
        let message = self
            .moderation
            .send_message(
                &self.http,
                CreateMessage::new()
                    .content(clip(&caption))
                    .add_file(CreateAttachment::bytes(bytes, "voice.ogg")),
            )
            .await
            .map_err(platform)?;
        message
            .attachments
            .first()
            .map(|a| FileRef(a.url.clone()))
            .ok_or(TransportError::MissingAttachment)
    }
}

/// Create and run the Discord bot
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);

    // Initialize database
    let db = Arc::new(Database::open(&config.database_path)?);

    let http = Arc::new(Http::new(&config.discord_token));
    let transport = Arc::new(DiscordTransport::new(http, &config));
    let runner = Arc::new(ProcessRunner::new(config.limits.stage_timeout));
    let engine = Engine::new(config.clone(), db.clone(), transport.clone(), runner);

    let (events, queue) = mpsc::channel(EVENT_QUEUE);
    tokio::spawn(engine.clone().run(queue));

    let scheduler = Arc::new(CleanupScheduler::new(
        engine.sessions.clone(),
        engine.matchmaker.clone(),
        db,
        transport,
        config.limits.clone(),
    ));
    scheduler.start();

    let handler = Handler {
        config: config.clone(),
        events,
    };

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await?;

    // Start the client
    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Button;

    #[test]
    fn test_clip_respects_discord_limit() {
        let long = "a".repeat(MAX_CONTENT + 50);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_CONTENT);
        assert!(clipped.ends_with('…'));
        assert_eq!(clip("short"), "short");
    }

    #[test]
    fn test_file_name_from_url() {
        let file = FileRef("https://cdn.example.net/attachments/1/2/cat.png?ex=1".into());
        assert_eq!(file_name(&file, "photo.jpg"), "cat.png");
        assert_eq!(file_name(&FileRef("https://x/".into()), "photo.jpg"), "photo.jpg");
    }

    #[test]
    fn test_components_follow_rows() {
        let controls = Controls::none()
            .row(vec![
                Button::new("A", Action::Help),
                Button::new("B", Action::Guidelines),
            ])
            .row(vec![Button::new("C", Action::Cancel)]);
        assert_eq!(components(&controls).len(), 2);
        assert!(components(&Controls::none()).is_empty());
    }
}

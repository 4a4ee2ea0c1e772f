//! Crewflow console: wires the platform together, seeds a demo workspace,
//! and turns stdin lines into chat posts so the whole ingestion pipeline can
//! be exercised end to end.

use std::env;
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crewflow_directory::{
    Channel, ChannelKind, ChannelRegistry, DepartmentRegistry, MessageLog, NewMessage, User,
    UserDirectory,
};
use crewflow_fanout::MemoryBroadcaster;
use crewflow_genai::{CannedGenerator, ExtractionClient, HttpTextGenerator, TextGenerator};
use crewflow_ingest::MessagePipeline;
use crewflow_lifecycle::TaskStore;
use crewflow_scoring::RuleBook;
use crewflow_squad::{AgentRoster, SquadAgent, SquadDispatcher};

/// Provider settings read from the environment. Without a provider URL the
/// console runs against the deterministic offline generator.
struct Settings {
    provider_url: Option<String>,
    api_key: String,
    model: String,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            provider_url: env::var("CREWFLOW_PROVIDER_URL").ok(),
            api_key: env::var("CREWFLOW_API_KEY").unwrap_or_default(),
            model: env::var("CREWFLOW_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        }
    }

    fn generator(&self) -> Arc<dyn TextGenerator> {
        match &self.provider_url {
            Some(url) => Arc::new(HttpTextGenerator::new(
                url.clone(),
                self.api_key.clone(),
                self.model.clone(),
            )),
            None => Arc::new(CannedGenerator::new()),
        }
    }
}

struct Platform {
    bus: Arc<MemoryBroadcaster>,
    pipeline: Arc<MessagePipeline>,
    dispatcher: Arc<SquadDispatcher>,
    general: Channel,
    demo_user: User,
}

async fn build_platform(settings: &Settings) -> Result<Platform> {
    let bus = Arc::new(MemoryBroadcaster::new(512));
    let users = Arc::new(UserDirectory::new());
    let departments = Arc::new(DepartmentRegistry::new());
    let channels = Arc::new(ChannelRegistry::new(bus.clone()));
    let messages = Arc::new(MessageLog::new(bus.clone()));
    let rules = Arc::new(RuleBook::with_default_rules());
    let extraction = Arc::new(ExtractionClient::new(settings.generator()));
    let tasks = Arc::new(TaskStore::new(
        rules,
        users.clone(),
        channels.clone(),
        messages.clone(),
        bus.clone(),
    ));

    let general = channels
        .create("general", ChannelKind::General, None, IndexSet::new())
        .await?;
    let platform_team = departments.create("Platform");
    channels
        .create(
            "platform",
            ChannelKind::Department,
            Some(platform_team.id),
            IndexSet::new(),
        )
        .await?;

    let roster = Arc::new(AgentRoster::new(users.clone()));
    roster.upsert(SquadAgent {
        department_id: platform_team.id,
        display_name: "Scout".to_string(),
        persona: "analyst".to_string(),
        instructions: "Keep the platform team honest about open work.".to_string(),
        active: true,
        triggers: IndexSet::from(["task_created".to_string()]),
    });

    let dispatcher = Arc::new(SquadDispatcher::new(
        roster,
        extraction.clone(),
        users.clone(),
        channels.clone(),
        messages.clone(),
        tasks.clone(),
    ));

    let demo_user = users.create_user("demo", "Demo Operator", true);
    let pipeline = Arc::new(MessagePipeline::new(
        users,
        departments,
        channels,
        messages,
        tasks,
        extraction,
        dispatcher.clone(),
    ));

    Ok(Platform {
        bus,
        pipeline,
        dispatcher,
        general,
        demo_user,
    })
}

fn spawn_event_mirror(bus: &MemoryBroadcaster) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let summary = event.payload["content"]
                .as_str()
                .or_else(|| event.payload["title"].as_str())
                .unwrap_or_default();
            println!("[{}] {}", event.event, summary);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env();
    if settings.provider_url.is_none() {
        info!("no CREWFLOW_PROVIDER_URL set, using the offline generator");
    }
    let platform = build_platform(&settings).await?;
    platform.dispatcher.spawn_event_loop(&platform.bus);
    spawn_event_mirror(&platform.bus);

    platform
        .pipeline
        .post(NewMessage::system(
            platform.general.id,
            "Crewflow console ready. Try: !task Fix the login page [P1] \u{2014} or !help",
        ))
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let content = line.trim().to_string();
        if content.is_empty() {
            continue;
        }
        if content == "quit" || content == "exit" {
            break;
        }
        let posted = platform
            .pipeline
            .post(NewMessage {
                channel_id: platform.general.id,
                sender_id: Some(platform.demo_user.id),
                content,
                ..NewMessage::default()
            })
            .await;
        if let Err(err) = posted {
            eprintln!("post rejected: {err}");
        }
    }
    Ok(())
}

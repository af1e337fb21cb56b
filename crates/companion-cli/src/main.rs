// ============================================================================
// companion - server and admin CLI for the persona chat backend
// ============================================================================
// Usage:
//   companion serve                                  Run the HTTP server
//   companion stats                                  Show database statistics
//   companion history --persona ID --user ID         Print a conversation
//   companion export --persona ID --user ID          Export a conversation as JSON
//   companion persona import FILE                    Load personas from JSON
//   companion persona list                           List stored personas
//   companion ingest --persona ID FILE               Index a background document
// ============================================================================

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use companion_core::server::{self, AppState};
use companion_core::{CompanionConfig, CompanionDb, ConversationKey, MemoryManager, Persona};
use std::sync::Arc;
use tracing::info;

/// Persona chat backend
#[derive(Parser)]
#[command(name = "companion", version, about = "Serve and manage the persona chat backend")]
struct Cli {
    /// Path to the database file (default: ~/.companion/companion.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address (default: COMPANION_HOST:COMPANION_PORT)
        #[arg(long)]
        addr: Option<String>,
    },

    /// Show database statistics (conversations, turns, personas)
    Stats,

    /// Print the recent history of one conversation
    History {
        #[arg(long)]
        persona: String,

        #[arg(long)]
        user: String,

        /// Model tag of the conversation (default: COMPANION_MODEL_NAME)
        #[arg(long)]
        model: Option<String>,
    },

    /// Export one conversation and its persona as JSON
    Export {
        #[arg(long)]
        persona: String,

        #[arg(long)]
        user: String,

        #[arg(long)]
        model: Option<String>,
    },

    /// Manage persona records
    Persona {
        #[command(subcommand)]
        command: PersonaCommands,
    },

    /// Split a text file into passages and index them for a persona
    Ingest {
        #[arg(long)]
        persona: String,

        /// Plain text file with the persona's background
        file: String,
    },
}

#[derive(Subcommand)]
enum PersonaCommands {
    /// Import one persona object or an array of them from a JSON file
    Import { file: String },

    /// List stored personas
    List,
}

fn format_timestamp(ts_millis: i64) -> String {
    Utc.timestamp_millis_opt(ts_millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts_millis))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("companion=info".parse()?)
                .add_directive("companion_core=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = CompanionConfig::default();
    let db = CompanionDb::open(cli.db_path.as_deref().or(config.db_path.as_deref()))?;

    match cli.command {
        Commands::Serve { addr } => cmd_serve(&config, db, addr).await,
        Commands::Stats => cmd_stats(&db),
        Commands::History {
            persona,
            user,
            model,
        } => cmd_history(&db, &conversation_key(&config, persona, user, model)),
        Commands::Export {
            persona,
            user,
            model,
        } => cmd_export(&db, &conversation_key(&config, persona, user, model)),
        Commands::Persona { command } => match command {
            PersonaCommands::Import { file } => cmd_persona_import(&db, &file),
            PersonaCommands::List => cmd_persona_list(&db),
        },
        Commands::Ingest { persona, file } => cmd_ingest(&config, db, &persona, &file).await,
    }
}

fn conversation_key(
    config: &CompanionConfig,
    persona: String,
    user: String,
    model: Option<String>,
) -> ConversationKey {
    let model = model.unwrap_or_else(|| config.model_name.clone());
    ConversationKey::new(persona, user, model)
}

async fn cmd_serve(config: &CompanionConfig, db: CompanionDb, addr: Option<String>) -> Result<()> {
    info!("Starting companion server");

    let state = AppState::from_config(config, db).await?;
    let addr = addr.unwrap_or_else(|| config.bind_addr());
    server::serve(&addr, state).await
}

fn cmd_stats(db: &CompanionDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Companion Database Stats ===");
    match db.path() {
        Some(path) => println!("Database: {}", path.display()),
        None => println!("Database: (in memory)"),
    }
    println!();
    println!("Conversations:    {}", stats.total_conversations);
    println!("Turns:            {}", stats.total_turns);
    println!("Personas:         {}", stats.total_personas);
    println!("Persona messages: {}", stats.total_persona_messages);

    let conversations = db.list_conversations()?;
    if !conversations.is_empty() {
        println!();
        for summary in &conversations {
            println!("  {:<48} {}", summary.key.render(), summary.turns);
        }
    }

    Ok(())
}

fn cmd_history(db: &CompanionDb, key: &ConversationKey) -> Result<()> {
    let turns = db.all_turns(key)?;

    if turns.is_empty() {
        println!("No history for {}.", key);
        return Ok(());
    }

    println!("{:<24}  {:<10}  {}", "WRITTEN AT", "ROLE", "CONTENT");
    println!("{}", "-".repeat(90));

    for turn in &turns {
        println!(
            "{:<24}  {:<10}  {}",
            format_timestamp(turn.written_at),
            turn.role.to_string(),
            turn.content
        );
    }

    println!("\nTotal: {} turns", turns.len());
    Ok(())
}

fn cmd_export(db: &CompanionDb, key: &ConversationKey) -> Result<()> {
    let turns = db.all_turns(key)?;
    let persona = db.get_persona(&key.persona_id)?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "key": key,
        "persona": persona,
        "turns": turns,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_persona_import(db: &CompanionDb, file: &str) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;

    let personas: Vec<Persona> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };

    for persona in &personas {
        if persona.id.trim().is_empty() {
            bail!("Persona '{}' has an empty id", persona.name);
        }
        db.store_persona(persona)?;
        println!("Imported {} ({})", persona.id, persona.name);
    }

    println!("\nTotal: {} personas", personas.len());
    Ok(())
}

fn cmd_persona_list(db: &CompanionDb) -> Result<()> {
    let personas = db.list_personas()?;

    if personas.is_empty() {
        println!("No personas found.");
        return Ok(());
    }

    println!("{:<24}  {:<20}  {:<16}  {}", "ID", "NAME", "CATEGORY", "INSTRUCTIONS");
    println!("{}", "-".repeat(90));

    for persona in &personas {
        let instructions = persona.instructions.chars().take(30).collect::<String>();
        println!(
            "{:<24}  {:<20}  {:<16}  {}",
            persona.id, persona.name, persona.category_id, instructions
        );
    }

    println!("\nTotal: {} personas", personas.len());
    Ok(())
}

async fn cmd_ingest(config: &CompanionConfig, db: CompanionDb, persona_id: &str, file: &str) -> Result<()> {
    let Some(persona) = db.get_persona(persona_id)? else {
        bail!("Unknown persona '{}'", persona_id);
    };

    if config.qdrant_url.is_none() {
        bail!("QDRANT_URL must be set to ingest documents");
    }
    let memory = MemoryManager::connect(config, Arc::new(db)).await?;
    if !memory.long_term_enabled() {
        bail!("No embedding API key set (XAI_API_KEY or OPENAI_API_KEY)");
    }

    let text = std::fs::read_to_string(file)?;
    let count = memory.index_document(&persona.source_file_id(), &text).await?;

    println!("Indexed {} passages into {}", count, persona.source_file_id());
    Ok(())
}

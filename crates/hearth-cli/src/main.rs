use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hearth_config::{
    find_config_path, load_config, resolve_path, save_config, EmbeddingProvider, CONFIG_ENV,
};
use hearth_core::agent::{ToolOutcome, TurnResponse};
use hearth_core::llm::model_pool::{DECISION_TIER, DEFAULT_TIER};
use hearth_core::llm::{Embedder, HashingEmbedder, ModelPool, OllamaEmbedder, RigChatModel};
use hearth_core::memory::{
    MemoryKind, MemoryRecord, SearchFilters, DEFAULT_IMPORTANCE, IMPORTANCE_KEY, KIND_KEY,
    SOURCE_KEY,
};
use hearth_core::tools::{CircuitBreakerConfig, HttpToolTransport, SAMPLE_CATALOG};
use hearth_core::{
    DecisionEngine, MemoryStore, Orchestrator, OrchestratorConfig, Scope, SqliteMemoryBackend,
    ToolDispatchClient, ToolRegistry, TurnRequest,
};
#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;
use rig::client::{CompletionClient, Nothing};
use rig::providers::{anthropic, ollama, openai};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Dimension used by the offline hashing embedder when none is configured.
const DEFAULT_HASHING_DIMENSIONS: usize = 256;

#[derive(Parser)]
#[command(name = "hearth", about = "Family assistant orchestration core", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct ScopeArgs {
    /// Family the conversation belongs to
    #[arg(long)]
    family: Uuid,

    /// Narrow the scope to one family member
    #[arg(long)]
    user: Option<Uuid>,
}

impl ScopeArgs {
    fn scope(self) -> Scope {
        match self.user {
            Some(user) => Scope::user(self.family, user),
            None => Scope::family(self.family),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Name of the person talking
        #[arg(long)]
        name: Option<String>,

        /// Single message mode (non-interactive)
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Inspect or call registered tools
    Tools {
        #[command(subcommand)]
        action: ToolCommands,
    },
    /// Store, browse and search memories
    Memory {
        #[command(subcommand)]
        action: MemoryCommands,
    },
    /// Initialize configuration and the tool catalog
    Onboard {
        /// Skip interactive prompts and write defaults
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show system status and configuration
    Status {
        /// Also report how many memories this family has stored
        #[arg(long)]
        family: Option<Uuid>,

        /// Narrow the memory count to one family member
        #[arg(long, requires = "family")]
        user: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum ToolCommands {
    /// Validate the catalog and list every action
    List {
        /// Print the function definitions sent to tool-calling models
        #[arg(long)]
        json: bool,
    },
    /// Execute one tool action directly
    Call {
        tool: String,
        action: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Store a memory
    Add {
        #[command(flatten)]
        scope: ScopeArgs,

        content: String,

        /// Memory kind (conversation, insight, preference, behavior, rule, summary, goal, fact)
        #[arg(long, default_value = "fact")]
        kind: MemoryKind,

        /// How much this memory matters (higher is more important)
        #[arg(long, default_value_t = DEFAULT_IMPORTANCE)]
        importance: u8,
    },
    /// List memories newest first
    List {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Only list memories of this kind
        #[arg(long)]
        kind: Option<MemoryKind>,

        /// Maximum number of memories to show
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Number of newest memories to skip
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
    /// Show one memory by id
    Show {
        #[command(flatten)]
        scope: ScopeArgs,

        id: Uuid,
    },
    /// Search memories by meaning
    Search {
        #[command(flatten)]
        scope: ScopeArgs,

        query: String,

        /// Only return memories of this kind
        #[arg(long)]
        kind: Option<MemoryKind>,

        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,

        /// Minimum similarity score
        #[arg(long)]
        min_score: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = format!("{base_filter},hyper=warn,reqwest=warn");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let cli = Cli::parse();

    if let Commands::Onboard { non_interactive } = cli.command {
        return run_onboard(cli.config, non_interactive);
    }

    let config_path = cli.config.unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Status { family, user } => {
            let scope = family.map(|family| ScopeArgs { family, user }.scope());
            run_status(&config_path, scope)
        }
        Commands::Tools { action } => {
            let config = load_config(&config_path)?;
            run_tool_command(action, &config).await
        }
        Commands::Memory { action } => {
            let config = load_config(&config_path)?;
            run_memory_command(action, &config).await
        }
        Commands::Chat {
            scope,
            name,
            message,
        } => {
            let config = load_config(&config_path)?;
            let orchestrator = build_orchestrator(&config)?;
            match message {
                Some(msg) => run_single_message(&orchestrator, scope.scope(), name, &msg).await,
                None => run_interactive(&orchestrator, scope.scope(), name).await,
            }
        }
        Commands::Onboard { .. } => unreachable!(),
    }
}

/// Resolve an API key from config, falling back to an environment variable.
fn resolve_api_key(
    provider_cfg: &Option<hearth_config::ProviderConfig>,
    env_var: &str,
) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_key.clone())
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|k| !k.is_empty()))
}

fn resolve_api_base(provider_cfg: &Option<hearth_config::ProviderConfig>) -> Option<String> {
    provider_cfg
        .as_ref()
        .and_then(|c| c.api_base.clone())
        .filter(|b| !b.is_empty())
}

/// Create a completion model for a specific provider + model combination.
///
/// Errors clearly if provider is unknown or has no API key.
#[allow(deprecated)]
fn create_model_for(
    provider: &str,
    model_name: &str,
    config: &hearth_config::Config,
) -> Result<CompletionModelHandle<'static>> {
    if provider.is_empty() {
        anyhow::bail!("No provider configured.\nValid providers: anthropic, openai, ollama");
    }

    if model_name.is_empty() {
        anyhow::bail!("No model configured for provider '{provider}'.");
    }

    match provider {
        "anthropic" => {
            let key = resolve_api_key(&config.providers.anthropic, "ANTHROPIC_API_KEY")
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Anthropic provider selected but no API key found. \
                     Set providers.anthropic.apiKey in config.json or ANTHROPIC_API_KEY env var."
                    )
                })?;
            let client: anthropic::Client = anthropic::Client::builder()
                .api_key(&key)
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Anthropic client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Anthropic provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "openai" => {
            let key =
                resolve_api_key(&config.providers.openai, "OPENAI_API_KEY").ok_or_else(|| {
                    anyhow::anyhow!(
                        "OpenAI provider selected but no API key found. \
                     Set providers.openai.apiKey in config.json or OPENAI_API_KEY env var."
                    )
                })?;
            let mut builder = openai::CompletionsClient::builder().api_key(&key);
            if let Some(ref base) = resolve_api_base(&config.providers.openai) {
                builder = builder.base_url(base);
                tracing::info!("Using OpenAI provider with custom base: {base}");
            }
            let client: openai::CompletionsClient = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using OpenAI provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        "ollama" => {
            let mut builder = ollama::Client::builder().api_key(Nothing);
            if let Some(ref base) = resolve_api_base(&config.providers.ollama) {
                builder = builder.base_url(base);
            }
            let client: ollama::Client = builder
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create Ollama client: {e}"))?;
            let model = client.completion_model(model_name);
            tracing::info!("Using Ollama provider with model '{model_name}'");
            Ok(CompletionModelHandle::new(Arc::new(model)))
        }

        other => {
            anyhow::bail!("Unknown provider '{other}'. Valid providers: anthropic, openai, ollama");
        }
    }
}

/// Build a ModelPool from `agents.models`.
#[allow(deprecated)]
fn create_model_pool(config: &hearth_config::Config) -> Result<ModelPool> {
    if config.agents.models.is_empty() {
        anyhow::bail!(
            "No models configured. Set agents.models in config.json with at least a \"default\" entry.\n\
             Example:\n  \
             \"models\": {{ \"default\": {{ \"provider\": \"ollama\", \"model\": \"llama3\" }} }}"
        );
    }

    let mut models = HashMap::new();
    for (tier, model_ref) in &config.agents.models {
        let handle = create_model_for(&model_ref.provider, &model_ref.model, config)
            .map_err(|e| anyhow::anyhow!("Failed to create model for tier '{tier}': {e}"))?;
        tracing::info!(
            "Model tier '{tier}': {} / {}",
            model_ref.provider,
            model_ref.model
        );
        models.insert(tier.clone(), (handle, model_ref.model.clone()));
    }

    ModelPool::new(models)
}

fn create_embedder(config: &hearth_config::Config) -> Arc<dyn Embedder> {
    let cfg = &config.embedding;
    match cfg.provider {
        EmbeddingProvider::Ollama => {
            let base = cfg
                .api_base
                .clone()
                .or_else(|| resolve_api_base(&config.providers.ollama));
            Arc::new(OllamaEmbedder::new(
                base.as_deref(),
                &cfg.model,
                Duration::from_secs(cfg.timeout_secs),
            ))
        }
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(
            cfg.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSIONS),
        )),
    }
}

fn embedding_dimensions(config: &hearth_config::Config) -> Option<usize> {
    match config.embedding.provider {
        EmbeddingProvider::Hashing => Some(
            config
                .embedding
                .dimensions
                .unwrap_or(DEFAULT_HASHING_DIMENSIONS),
        ),
        EmbeddingProvider::Ollama => config.embedding.dimensions,
    }
}

fn open_memory_store(config: &hearth_config::Config) -> Result<MemoryStore> {
    let db_path = resolve_path(&config.memory.db_path);
    let backend = SqliteMemoryBackend::open(&db_path)
        .with_context(|| format!("failed to open memory database '{}'", db_path.display()))?;
    Ok(MemoryStore::new(create_embedder(config), Arc::new(backend))
        .with_embed_timeout(Duration::from_secs(config.embedding.timeout_secs))
        .with_dimensions(embedding_dimensions(config)))
}

fn load_registry(config: &hearth_config::Config) -> Result<ToolRegistry> {
    let catalog_path = resolve_path(&config.tools.catalog_path);
    ToolRegistry::from_file(&catalog_path).with_context(|| {
        format!(
            "failed to load tool catalog '{}' (run `hearth onboard` to write a sample)",
            catalog_path.display()
        )
    })
}

fn create_dispatcher(
    config: &hearth_config::Config,
    registry: Arc<ToolRegistry>,
) -> ToolDispatchClient {
    ToolDispatchClient::new(
        registry,
        Arc::new(HttpToolTransport::default()),
        CircuitBreakerConfig::from(&config.tools.circuit),
    )
}

fn build_orchestrator(config: &hearth_config::Config) -> Result<Orchestrator> {
    let registry = Arc::new(load_registry(config)?);
    let memory = Arc::new(open_memory_store(config)?);
    let dispatcher = Arc::new(create_dispatcher(config, registry.clone()));

    let pool = create_model_pool(config)?;
    let defaults = &config.agents.defaults;
    let (decision_handle, decision_name) = pool.get(DECISION_TIER);
    let decision_model = RigChatModel::new(
        decision_handle.clone(),
        decision_name,
        f64::from(defaults.temperature),
        u64::from(defaults.max_tokens),
    );
    let (reply_handle, reply_name) = pool.get(DEFAULT_TIER);
    let reply_model = RigChatModel::new(
        reply_handle.clone(),
        reply_name,
        f64::from(defaults.temperature),
        u64::from(defaults.max_tokens),
    );

    let engine = DecisionEngine::new(
        registry,
        Arc::new(decision_model),
        Duration::from_secs(defaults.decision_timeout_secs),
    );

    let orchestrator_config = OrchestratorConfig {
        context_k: defaults.context_k,
        score_threshold: config.memory.score_threshold,
        tool_timeout: Duration::from_secs(config.tools.timeout_secs),
        generation_timeout: Duration::from_secs(defaults.generation_timeout_secs),
    };

    Ok(Orchestrator::new(
        memory,
        engine,
        dispatcher,
        Arc::new(reply_model),
        orchestrator_config,
    ))
}

fn print_turn(response: &TurnResponse) {
    match &response.tool_outcome {
        ToolOutcome::NotAttempted => {}
        outcome => {
            if let Some(detail) = outcome.describe() {
                println!("[{}] {detail}", outcome.status());
            }
        }
    }
    println!("{}", response.reply);
}

async fn run_single_message(
    orchestrator: &Orchestrator,
    scope: Scope,
    user_name: Option<String>,
    message: &str,
) -> Result<()> {
    let mut request = TurnRequest::new(scope, message);
    request.user_name = user_name;
    let response = orchestrator.run_turn(request).await?;
    print_turn(&response);
    Ok(())
}

async fn run_interactive(
    orchestrator: &Orchestrator,
    scope: Scope,
    user_name: Option<String>,
) -> Result<()> {
    let history_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hearth")
        .join("history");
    std::fs::create_dir_all(&history_dir)?;
    let history_path = history_dir.join("cli_history");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    println!("hearth interactive mode for {scope} (type /help for commands, Ctrl-D to quit)");
    println!();

    let mut exchanges: Vec<(String, String)> = Vec::new();

    let result = loop {
        let readline = rl.readline("you> ");
        match readline {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(input);

                if matches!(input, "exit" | "quit" | "/exit" | "/quit" | ":q") {
                    break Ok(());
                }

                match input {
                    "/help" => {
                        println!("Commands:");
                        println!("  /new    - Forget the exchanges of this session");
                        println!("  /tools  - List available tool actions");
                        println!("  /circuits - Show circuit breaker state per tool");
                        println!("  /help   - Show this help");
                        println!("  /quit   - Exit");
                        println!();
                        continue;
                    }
                    "/new" => {
                        exchanges.clear();
                        println!("New session started.");
                        println!();
                        continue;
                    }
                    "/tools" => {
                        for action in orchestrator.dispatcher().registry().describe_for_prompt() {
                            println!("  {}.{}", action.tool_name, action.action_name);
                        }
                        println!();
                        continue;
                    }
                    "/circuits" => {
                        let snapshot = orchestrator.dispatcher().circuits().snapshot();
                        if snapshot.is_empty() {
                            println!("  No tool has been called yet.");
                        }
                        for circuit in snapshot {
                            println!(
                                "  {}: {:?} ({} consecutive failures)",
                                circuit.tool, circuit.state, circuit.consecutive_failures
                            );
                        }
                        println!();
                        continue;
                    }
                    _ => {}
                }

                let mut request = TurnRequest::new(scope, input);
                request.user_name = user_name.clone();
                request.history = exchanges.clone();

                match orchestrator.run_turn(request).await {
                    Ok(response) => {
                        println!();
                        print_turn(&response);
                        println!();
                        exchanges.push((input.to_string(), response.reply));
                    }
                    Err(e) => {
                        eprintln!("Error: {e}");
                        println!();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break Ok(());
            }
            Err(err) => {
                eprintln!("Error: {err}");
                break Ok(());
            }
        }
    };

    let _ = rl.save_history(&history_path);

    result
}

/// Parse a JSON object given on the command line into tool arguments.
fn parse_arguments(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("arguments must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("arguments must be a JSON object, got: {other}"),
    }
}

async fn run_tool_command(action: ToolCommands, config: &hearth_config::Config) -> Result<()> {
    let registry = Arc::new(load_registry(config)?);

    match action {
        ToolCommands::List { json } => {
            if json {
                let defs = registry.function_definitions();
                println!("{}", serde_json::to_string_pretty(&defs)?);
                return Ok(());
            }
            println!("{} tool(s) registered:", registry.len());
            for tool in registry.tools() {
                println!();
                println!("  {} ({}) -> {}", tool.name, tool.display_name, tool.endpoint);
                for action in registry
                    .describe_for_prompt()
                    .into_iter()
                    .filter(|a| a.tool_name == tool.name)
                {
                    println!("    {}: {}", action.action_name, action.description);
                    if !action.required_params.is_empty() {
                        println!("      required: {}", action.required_params.join(", "));
                    }
                    if !action.optional_params.is_empty() {
                        println!("      optional: {}", action.optional_params.join(", "));
                    }
                }
            }
        }
        ToolCommands::Call { tool, action, args } => {
            let arguments = parse_arguments(&args)?;
            let dispatcher = create_dispatcher(config, registry);
            let result = dispatcher
                .execute(
                    &tool,
                    &action,
                    arguments,
                    Duration::from_secs(config.tools.timeout_secs),
                )
                .await?;
            println!("status: {}", result.status);
            println!("{}", serde_json::to_string_pretty(&result.payload)?);
        }
    }

    Ok(())
}

async fn run_memory_command(action: MemoryCommands, config: &hearth_config::Config) -> Result<()> {
    let store = open_memory_store(config)?;

    match action {
        MemoryCommands::Add {
            scope,
            content,
            kind,
            importance,
        } => {
            let mut metadata = Map::new();
            metadata.insert(KIND_KEY.into(), Value::String(kind.as_str().into()));
            metadata.insert(SOURCE_KEY.into(), Value::String("cli".into()));
            metadata.insert(IMPORTANCE_KEY.into(), Value::from(importance));
            let id = store.store(scope.scope(), &content, metadata).await?;
            println!("Stored memory {id}");
        }
        MemoryCommands::Search {
            scope,
            query,
            kind,
            k,
            min_score,
        } => {
            let mut filters = SearchFilters::default().with_min_score(min_score);
            if let Some(kind) = kind {
                filters = filters.with_kind(kind);
            }
            let results = store.search(scope.scope(), &query, k, &filters).await?;
            if results.is_empty() {
                println!("No memories found.");
            }
            for hit in results {
                println!("{:.3}  {}", hit.score, memory_line(&hit.record));
            }
        }
        MemoryCommands::List {
            scope,
            kind,
            limit,
            skip,
        } => {
            let scope = scope.scope();
            let mut filters = SearchFilters::default();
            if let Some(kind) = kind {
                filters = filters.with_kind(kind);
            }
            let records = store.list(scope, &filters, limit, skip)?;
            println!("{} memories in {scope}", store.count(&scope)?);
            for record in records {
                println!("{}  {}", record.id, memory_line(&record));
            }
        }
        MemoryCommands::Show { scope, id } => {
            let record = store
                .get(scope.scope(), id)?
                .ok_or_else(|| anyhow::anyhow!("no memory {id} in {}", scope.scope()))?;
            println!("id:       {}", record.id);
            println!("scope:    {}", record.scope);
            println!("created:  {}", record.created_at.to_rfc3339());
            println!("metadata: {}", Value::Object(record.metadata));
            println!();
            println!("{}", record.content);
        }
    }

    Ok(())
}

/// One-line summary: `[kind] content (created)`.
fn memory_line(record: &MemoryRecord) -> String {
    let kind = record
        .metadata
        .get(KIND_KEY)
        .and_then(Value::as_str)
        .unwrap_or("-");
    format!(
        "[{kind}] {}  ({})",
        record.content,
        record.created_at.format("%Y-%m-%d %H:%M")
    )
}

fn prompt_with_default(prompt: &str, default: &str) -> Result<String> {
    use std::io::{self, Write};
    print!("{prompt} [{default}]: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Write a starter config and a sample tool catalog.
fn run_onboard(config_arg: Option<PathBuf>, non_interactive: bool) -> Result<()> {
    let config_path = config_arg.unwrap_or_else(find_config_path);
    let config = if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `hearth onboard` again.");
        load_config(&config_path)?
    } else {
        let mut cfg = hearth_config::Config::default();
        let (provider, model) = if non_interactive {
            ("ollama".to_string(), "llama3".to_string())
        } else {
            println!("Interactive setup");
            let provider = prompt_with_default("Model provider (ollama/openai/anthropic)", "ollama")?;
            let model = prompt_with_default("Model name", "llama3")?;
            (provider, model)
        };
        cfg.agents.models.insert(
            DEFAULT_TIER.to_string(),
            hearth_config::ModelRef { provider, model },
        );
        save_config(&config_path, &cfg)?;
        println!("Created config: {}", config_path.display());
        cfg
    };

    let catalog_path = resolve_path(&config.tools.catalog_path);
    if catalog_path.exists() {
        println!("Tool catalog already exists: {}", catalog_path.display());
    } else {
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&catalog_path, SAMPLE_CATALOG)
            .with_context(|| format!("failed to write catalog '{}'", catalog_path.display()))?;
        println!("Created sample tool catalog: {}", catalog_path.display());
    }

    println!();
    println!("Next: `hearth chat --family <uuid>`");
    Ok(())
}

/// Show system status and configuration summary.
fn run_status(config_path: &Path, scope: Option<Scope>) -> Result<()> {
    println!("hearth status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
        if std::env::var_os(CONFIG_ENV).is_some() {
            println!("             selected by {CONFIG_ENV}");
        }
    } else {
        println!(
            "  Config:    {} (not found, run `hearth onboard`)",
            config_path.display()
        );
        return Ok(());
    }

    let config = load_config(config_path)?;

    // Models
    let mut tiers: Vec<_> = config.agents.models.iter().collect();
    tiers.sort_by(|a, b| a.0.cmp(b.0));
    if tiers.is_empty() {
        println!("  Models:    (not set)");
    }
    for (tier, model_ref) in tiers {
        println!("  Model:     {tier} = {} / {}", model_ref.provider, model_ref.model);
    }
    println!(
        "  Embedding: {:?} / {} (dimensions: {})",
        config.embedding.provider,
        config.embedding.model,
        embedding_dimensions(&config)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "any".into())
    );
    println!();

    // Tools
    let catalog_path = resolve_path(&config.tools.catalog_path);
    println!("  Tools:");
    match ToolRegistry::from_file(&catalog_path) {
        Ok(registry) => {
            let actions = registry.describe_for_prompt().len();
            println!(
                "    Catalog: {} ({} tools, {actions} actions)",
                catalog_path.display(),
                registry.len()
            );
        }
        Err(e) => println!("    Catalog: {} (invalid: {e})", catalog_path.display()),
    }
    println!("    Call timeout: {}s", config.tools.timeout_secs);
    let circuit = CircuitBreakerConfig::from(&config.tools.circuit);
    println!(
        "    Circuit breaker: open after {} failures, retry after {}s",
        circuit.failure_threshold,
        circuit.reset_timeout.as_secs()
    );
    println!();

    // Memory
    let db_path = resolve_path(&config.memory.db_path);
    println!("  Memory:");
    if db_path.exists() {
        println!("    Database: {} (found)", db_path.display());
    } else {
        println!("    Database: {} (created on first use)", db_path.display());
    }
    println!(
        "    Context: top {} (threshold: {})",
        config.agents.defaults.context_k,
        config
            .memory
            .score_threshold
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".into())
    );
    if let Some(scope) = scope {
        let store = open_memory_store(&config)?;
        println!("    Stored for {scope}: {}", store.count(&scope)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_must_be_an_object() {
        let args = parse_arguments(r#"{"chore_id": "c1", "status": "completed"}"#).unwrap();
        assert_eq!(args["status"], "completed");
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("not json").is_err());
    }

    #[test]
    fn scope_args_pick_the_narrowest_scope() {
        let family = Uuid::new_v4();
        let user = Uuid::new_v4();
        let args = ScopeArgs { family, user: None };
        assert_eq!(args.scope(), Scope::family(family));
        let args = ScopeArgs {
            family,
            user: Some(user),
        };
        assert_eq!(args.scope(), Scope::user(family, user));
    }

    #[test]
    fn cli_parses_chat_and_memory_commands() {
        let family = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["hearth", "chat", "--family", &family, "-m", "hi"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { message: Some(_), .. }));

        let cli = Cli::try_parse_from([
            "hearth", "memory", "search", "--family", &family, "bedtime", "--kind", "rule",
        ])
        .unwrap();
        match cli.command {
            Commands::Memory {
                action: MemoryCommands::Search { kind, k, .. },
            } => {
                assert_eq!(kind, Some(MemoryKind::Rule));
                assert_eq!(k, 5);
            }
            _ => panic!("expected memory search"),
        }

        assert!(Cli::try_parse_from(["hearth", "chat", "--family", "not-a-uuid"]).is_err());
    }

    #[test]
    fn cli_parses_memory_listing_and_importance() {
        let family = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from([
            "hearth", "memory", "list", "--family", &family, "--kind", "rule", "--skip", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Memory {
                action: MemoryCommands::List { kind, limit, skip, .. },
            } => {
                assert_eq!(kind, Some(MemoryKind::Rule));
                assert_eq!(limit, 20);
                assert_eq!(skip, 10);
            }
            _ => panic!("expected memory list"),
        }

        let cli =
            Cli::try_parse_from(["hearth", "memory", "add", "--family", &family, "nap at two"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Memory {
                action: MemoryCommands::Add { importance: DEFAULT_IMPORTANCE, .. }
            }
        ));

        let id = Uuid::new_v4().to_string();
        let cli =
            Cli::try_parse_from(["hearth", "memory", "show", "--family", &family, &id]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Memory {
                action: MemoryCommands::Show { .. }
            }
        ));
    }

    #[test]
    fn hashing_embedder_always_has_dimensions() {
        let mut config = hearth_config::Config::default();
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.embedding.dimensions = None;
        assert_eq!(embedding_dimensions(&config), Some(DEFAULT_HASHING_DIMENSIONS));
    }
}

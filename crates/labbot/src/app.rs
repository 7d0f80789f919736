use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use labbot_core::{
    analytics::{
        mock::MockSampleSource,
        period::{clock_from_settings, Clock},
        sample::SampleAnalytics,
        AnalyticsBackend,
    },
    charts::SvgChartRenderer,
    config::{AnalyticsBackendKind, Config, MemoryStrategy},
    memory::{Checkpointer, InMemoryCheckpointer},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    model::ChatModel,
    pipeline::{Formatter, Graph, InputDigest, MainBot},
    prompt::PromptStore,
    security::{ApiKeyGuard, RateLimiter},
    service::ConversationService,
    tools::{DataAccess, MaintenanceSheet, ToolRegistry, WebSearch},
};
use labbot_integrations::{GoogleSheetsStore, RemoteAnalytics, TavilySearch};
use labbot_llm::{GroqMediaInterpreter, OpenAiChatModel};
use labbot_postgres::{connect_lazy, PostgresCheckpointer, SqlAnalytics};
use labbot_telegram::{BotFileFetcher, InputProcessor, TelegramHandler, TelegramMessenger};

use crate::server::AppState;

const MEMORY_MAX_CONNECTIONS: u32 = 5;

pub struct App {
    pub state: AppState,
    pub checkpointer: Arc<dyn Checkpointer>,
}

pub async fn build(cfg: &Config) -> anyhow::Result<App> {
    let prompts = Arc::new(PromptStore::new(&cfg.server.prompts_dir));
    let clock = clock_from_settings(cfg.analytics.utc_offset_minutes, cfg.analytics.reference_date)?;
    if let Some(date) = cfg.analytics.reference_date {
        info!(%date, "reference date pinned, periods resolve against it");
    }

    let checkpointer = checkpointer(cfg)?;
    checkpointer
        .open()
        .await
        .with_context(|| format!("failed to open {} checkpointer", checkpointer.name()))?;

    let tools = tools(cfg, clock.clone())?;
    info!(tools = ?tools.names(), "agent tools registered");

    let main_model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(&cfg.main_llm)?);
    let formatter_model: Arc<dyn ChatModel> = Arc::new(OpenAiChatModel::new(&cfg.formatter_llm)?);

    let graph = Graph::new(checkpointer.clone())
        .then(Arc::new(InputDigest::new(cfg.bot.max_history)))
        .then(Arc::new(MainBot::new(
            main_model,
            tools,
            prompts.clone(),
            cfg.main_llm.prompt_name.clone(),
            cfg.bot.name.clone(),
            clock,
            cfg.bot.max_tool_rounds,
        )))
        .then(Arc::new(Formatter::new(
            formatter_model,
            prompts.clone(),
            cfg.formatter_llm.prompt_name.clone(),
            cfg.analytics.plots_dir.clone(),
        )));
    info!(nodes = ?graph.node_names(), "response graph compiled");

    let service = ConversationService::new(Arc::new(graph));
    let telegram = telegram(cfg, service.clone(), prompts)?;

    let guard = ApiKeyGuard::new(cfg.security.mode, cfg.security.secret.as_deref())?;
    if !guard.is_enabled() {
        warn!("security is disabled by configuration, requests are not authenticated");
    }

    Ok(App {
        state: AppState {
            service,
            telegram,
            guard,
        },
        checkpointer,
    })
}

fn checkpointer(cfg: &Config) -> anyhow::Result<Arc<dyn Checkpointer>> {
    Ok(match cfg.memory.strategy {
        MemoryStrategy::InMemory => Arc::new(InMemoryCheckpointer::new()),
        MemoryStrategy::Postgres => {
            let url = cfg
                .memory
                .url
                .as_deref()
                .context("MEMORY__URL is required for the postgres memory strategy")?;
            let pool = connect_lazy(url, MEMORY_MAX_CONNECTIONS)?;
            Arc::new(PostgresCheckpointer::new(pool, cfg.memory.disable_migrations))
        }
    })
}

fn analytics_backend(
    cfg: &Config,
    clock: &Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn AnalyticsBackend>> {
    let backend: Arc<dyn AnalyticsBackend> = match cfg.analytics.backend {
        AnalyticsBackendKind::Sql => {
            let url = cfg
                .readings_database
                .url
                .as_deref()
                .context("READINGS_DATABASE__URL is required for the sql analytics backend")?;
            let pool = connect_lazy(url, cfg.readings_database.max_connections)?;
            Arc::new(SqlAnalytics::new(pool))
        }
        AnalyticsBackendKind::Remote => {
            let url = cfg
                .analytics
                .remote_url
                .as_deref()
                .context("ANALYTICS__REMOTE_URL is required for the remote analytics backend")?;
            Arc::new(RemoteAnalytics::new(url, cfg.analytics.remote_token.clone())?)
        }
        AnalyticsBackendKind::Mock => {
            let source = MockSampleSource::new(clock.now());
            Arc::new(SampleAnalytics::new(Arc::new(source)))
        }
    };
    info!(backend = backend.name(), "analytics backend ready");
    Ok(backend)
}

/// Data access is always on; web search and the maintenance sheet only when configured.
fn tools(cfg: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<ToolRegistry> {
    let backend = analytics_backend(cfg, &clock)?;
    let mut registry = ToolRegistry::new().with(Arc::new(DataAccess::new(
        backend,
        clock,
        Arc::new(SvgChartRenderer::new(cfg.analytics.plots_dir.clone())),
        cfg.analytics.params,
        cfg.analytics.max_report_chars,
    )));

    match &cfg.tavily.api_key {
        Some(key) => registry.register(Arc::new(WebSearch::new(
            Arc::new(TavilySearch::new(key.clone())?),
            cfg.tavily.max_results,
        ))),
        None => info!("TAVILY__API_KEY not set, web search disabled"),
    }

    let sheets = &cfg.google_sheets;
    match (&sheets.sheet_id, &sheets.access_token) {
        (Some(id), Some(token)) => registry.register(Arc::new(MaintenanceSheet::new(
            Arc::new(GoogleSheetsStore::new(id.clone(), token.clone())?),
            sheets.sheet_name.clone(),
        ))),
        _ => info!("google sheets not configured, maintenance tool disabled"),
    }

    Ok(registry)
}

fn telegram(
    cfg: &Config,
    service: ConversationService,
    prompts: Arc<PromptStore>,
) -> anyhow::Result<Option<Arc<TelegramHandler>>> {
    let Some(token) = &cfg.bot.telegram_token else {
        info!("BOT__TELEGRAM_TOKEN not set, telegram webhook disabled");
        return Ok(None);
    };

    let raw = TelegramMessenger::from_token(token.clone(), cfg.bot.telegram_message_limit);
    let fetcher = Arc::new(BotFileFetcher::new(raw.bot()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        Arc::new(raw),
        ThrottleConfig::default(),
    ));
    let media = Arc::new(GroqMediaInterpreter::new(
        &cfg.audio_model,
        &cfg.omni_model,
        prompts,
    )?);

    let handler = TelegramHandler::new(
        service,
        InputProcessor::new(fetcher, media),
        messenger,
        RateLimiter::new(
            cfg.bot.rate_limit_enabled,
            cfg.bot.rate_limit_requests,
            cfg.bot.rate_limit_window,
        ),
    );
    info!("telegram webhook enabled");
    Ok(Some(Arc::new(handler)))
}

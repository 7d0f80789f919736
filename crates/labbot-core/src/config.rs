use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::NaiveDate;

use crate::{
    analytics::types::{AnalyticsParams, VoltageBand},
    errors::Error,
    Result,
};

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Typed configuration.
///
/// Keys are nested with `__` (`MAIN_LLM__API_KEY`, `ANALYTICS__BACKEND`) and are
/// case-insensitive. A `.env` file in the working directory is read first but
/// never overrides variables already present in the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot: BotSettings,
    pub main_llm: LlmSettings,
    pub formatter_llm: LlmSettings,
    pub audio_model: LlmSettings,
    pub omni_model: OmniModelSettings,
    pub tavily: TavilySettings,
    pub google_sheets: GoogleSheetsSettings,
    pub memory: MemorySettings,
    pub readings_database: ReadingsDatabaseSettings,
    pub analytics: AnalyticsSettings,
    pub security: SecuritySettings,
    pub logger: LoggerSettings,
    pub server: ServerSettings,
}

#[derive(Clone, Debug)]
pub struct BotSettings {
    pub name: String,
    pub max_history: usize,
    pub max_tool_rounds: usize,
    pub telegram_token: Option<String>,
    pub telegram_message_limit: usize,
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

#[derive(Clone, Debug)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub prompt_name: String,
}

#[derive(Clone, Debug)]
pub struct OmniModelSettings {
    pub llm: LlmSettings,
    pub max_completion_tokens: u32,
    pub top_p: f32,
}

#[derive(Clone, Debug)]
pub struct TavilySettings {
    pub api_key: Option<String>,
    pub max_results: u8,
}

#[derive(Clone, Debug)]
pub struct GoogleSheetsSettings {
    pub sheet_id: Option<String>,
    pub access_token: Option<String>,
    pub sheet_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryStrategy {
    InMemory,
    Postgres,
}

#[derive(Clone, Debug)]
pub struct MemorySettings {
    pub strategy: MemoryStrategy,
    pub disable_migrations: bool,
    pub url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReadingsDatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalyticsBackendKind {
    Sql,
    Remote,
    Mock,
}

#[derive(Clone, Debug)]
pub struct AnalyticsSettings {
    pub backend: AnalyticsBackendKind,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub utc_offset_minutes: i32,
    pub reference_date: Option<NaiveDate>,
    pub params: AnalyticsParams,
    pub max_report_chars: usize,
    pub plots_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityMode {
    None,
    ApiKey,
}

#[derive(Clone, Debug)]
pub struct SecuritySettings {
    pub mode: SecurityMode,
    pub secret: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggerSettings {
    pub level: String,
}

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub prompts_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let vars: HashMap<String, String> =
            env::vars().map(|(k, v)| (k.to_uppercase(), v)).collect();
        Self::from_vars(&vars)
    }

    /// Build the config from an upper-cased key/value map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let env = Env(vars);

        // Main LLM is the only hard requirement; the other model roles reuse its key.
        let main_key = env
            .str("MAIN_LLM__API_KEY")
            .ok_or_else(|| Error::Config("MAIN_LLM__API_KEY is required".to_string()))?;

        let main_llm = env.llm("MAIN_LLM", &main_key, "llama-3.3-70b-versatile", "main_bot");
        let formatter_llm = env.llm(
            "FORMATTER_LLM",
            &main_key,
            "llama-3.3-70b-versatile",
            "formatter",
        );
        let audio_model = env.llm(
            "AUDIO_MODEL",
            &main_key,
            "whisper-large-v3-turbo",
            "audio_transcription",
        );
        let omni_model = OmniModelSettings {
            llm: env.llm(
                "OMNI_MODEL",
                &main_key,
                "meta-llama/llama-4-scout-17b-16e-instruct",
                "image_description",
            ),
            max_completion_tokens: env.u32("OMNI_MODEL__MAX_COMPLETION_TOKENS").unwrap_or(1024),
            top_p: env.f32("OMNI_MODEL__TOP_P").unwrap_or(1.0),
        };

        let bot = BotSettings {
            name: env.str("BOT__NAME").unwrap_or_else(|| "LABI".to_string()),
            max_history: env.usize("BOT__MAX_HISTORY").unwrap_or(10).max(1),
            max_tool_rounds: env.usize("BOT__MAX_TOOL_ROUNDS").unwrap_or(6).max(1),
            telegram_token: env.str("BOT__TELEGRAM_TOKEN"),
            telegram_message_limit: env.usize("BOT__TELEGRAM_MESSAGE_LIMIT").unwrap_or(4096),
            rate_limit_enabled: env.bool("BOT__RATE_LIMIT_ENABLED").unwrap_or(true),
            rate_limit_requests: env.u32("BOT__RATE_LIMIT_REQUESTS").unwrap_or(20),
            rate_limit_window: Duration::from_secs(
                env.u64("BOT__RATE_LIMIT_WINDOW_SECS").unwrap_or(60),
            ),
        };

        let tavily = TavilySettings {
            api_key: env.str("TAVILY__API_KEY"),
            max_results: env
                .u32("TAVILY__MAX_RESULTS")
                .map(|n| n.clamp(1, 10) as u8)
                .unwrap_or(3),
        };

        let google_sheets = GoogleSheetsSettings {
            sheet_id: env.str("GOOGLE_SHEETS__SHEET_ID"),
            access_token: env.str("GOOGLE_SHEETS__ACCESS_TOKEN"),
            sheet_name: env
                .str("GOOGLE_SHEETS__SHEET_NAME")
                .unwrap_or_else(|| "Sheet1".to_string()),
        };

        let memory = MemorySettings {
            strategy: match env
                .str("MEMORY__STRATEGY")
                .as_deref()
                .map(str::to_lowercase)
                .as_deref()
            {
                None | Some("in_memory") => MemoryStrategy::InMemory,
                Some("postgres") => MemoryStrategy::Postgres,
                Some(other) => {
                    return Err(Error::Config(format!("unknown memory strategy: {other}")))
                }
            },
            disable_migrations: env.bool("MEMORY__DISABLE_MIGRATIONS").unwrap_or(true),
            url: env.str("MEMORY__URL"),
        };
        if memory.strategy == MemoryStrategy::Postgres && memory.url.is_none() {
            return Err(Error::Config(
                "MEMORY__URL is required for the postgres memory strategy".to_string(),
            ));
        }

        let readings_database = ReadingsDatabaseSettings {
            url: env.str("READINGS_DATABASE__URL"),
            max_connections: env.u32("READINGS_DATABASE__MAX_CONNECTIONS").unwrap_or(5),
        };

        let analytics = load_analytics(&env)?;
        match analytics.backend {
            AnalyticsBackendKind::Sql if readings_database.url.is_none() => {
                return Err(Error::Config(
                    "READINGS_DATABASE__URL is required for the sql analytics backend".to_string(),
                ));
            }
            AnalyticsBackendKind::Remote if analytics.remote_url.is_none() => {
                return Err(Error::Config(
                    "ANALYTICS__REMOTE_URL is required for the remote analytics backend"
                        .to_string(),
                ));
            }
            _ => {}
        }

        let security = SecuritySettings {
            mode: match env
                .str("SECURITY__TYPE")
                .map(|s| s.to_uppercase())
                .as_deref()
            {
                None | Some("APIKEY") => SecurityMode::ApiKey,
                Some("NONE") => SecurityMode::None,
                Some(other) => {
                    return Err(Error::Config(format!("unknown security type: {other}")))
                }
            },
            secret: env.str("SECURITY__SECRET"),
        };
        if security.mode == SecurityMode::ApiKey && security.secret.is_none() {
            return Err(Error::Config(
                "SECURITY__SECRET is required when SECURITY__TYPE=APIKEY".to_string(),
            ));
        }

        let logger = LoggerSettings {
            level: env
                .str("LOGGER__LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        };

        let server = ServerSettings {
            bind_addr: env
                .str("SERVER__BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            prompts_dir: PathBuf::from(
                env.str("SERVER__PROMPTS_DIR")
                    .unwrap_or_else(|| "prompts".to_string()),
            ),
        };

        Ok(Self {
            bot,
            main_llm,
            formatter_llm,
            audio_model,
            omni_model,
            tavily,
            google_sheets,
            memory,
            readings_database,
            analytics,
            security,
            logger,
            server,
        })
    }
}

fn load_analytics(env: &Env<'_>) -> Result<AnalyticsSettings> {
    let backend = match env
        .str("ANALYTICS__BACKEND")
        .map(|s| s.to_lowercase())
        .as_deref()
    {
        None | Some("sql") => AnalyticsBackendKind::Sql,
        Some("remote") => AnalyticsBackendKind::Remote,
        Some("mock") => AnalyticsBackendKind::Mock,
        Some(other) => {
            return Err(Error::Config(format!(
                "unknown analytics backend: {other}"
            )))
        }
    };

    let reference_date = match env.str("ANALYTICS__REFERENCE_DATE") {
        Some(raw) => Some(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
            Error::Config(format!("ANALYTICS__REFERENCE_DATE must be YYYY-MM-DD: {e}"))
        })?),
        None => None,
    };

    let defaults = AnalyticsParams::default();
    let band = VoltageBand {
        nominal: env
            .f64("ANALYTICS__NOMINAL_VOLTAGE")
            .unwrap_or(defaults.voltage_band.nominal),
        lower: env
            .f64("ANALYTICS__VOLTAGE_LOWER")
            .unwrap_or(defaults.voltage_band.lower),
        upper: env
            .f64("ANALYTICS__VOLTAGE_UPPER")
            .unwrap_or(defaults.voltage_band.upper),
        outage: env
            .f64("ANALYTICS__OUTAGE_VOLTAGE")
            .unwrap_or(defaults.voltage_band.outage),
    };
    if !(band.outage < band.lower && band.lower < band.nominal && band.nominal < band.upper) {
        return Err(Error::Config(format!(
            "voltage band must satisfy outage < lower < nominal < upper (got {band:?})"
        )));
    }

    let params = AnalyticsParams {
        demand_window: env
            .u64("ANALYTICS__DEMAND_WINDOW_MINUTES")
            .map(|m| Duration::from_secs(m.max(1) * 60))
            .unwrap_or(defaults.demand_window),
        max_gap: env
            .u64("ANALYTICS__MAX_GAP_MINUTES")
            .map(|m| Duration::from_secs(m.max(1) * 60))
            .unwrap_or(defaults.max_gap),
        power_factor_reference: env
            .f64("ANALYTICS__POWER_FACTOR_REFERENCE")
            .unwrap_or(defaults.power_factor_reference),
        imbalance_threshold_pct: env
            .f64("ANALYTICS__IMBALANCE_THRESHOLD_PCT")
            .unwrap_or(defaults.imbalance_threshold_pct),
        voltage_band: band,
        max_events: env
            .usize("ANALYTICS__MAX_EVENTS")
            .unwrap_or(defaults.max_events),
    };

    Ok(AnalyticsSettings {
        backend,
        remote_url: env.str("ANALYTICS__REMOTE_URL"),
        remote_token: env.str("ANALYTICS__REMOTE_TOKEN"),
        utc_offset_minutes: env
            .i32("ANALYTICS__UTC_OFFSET_MINUTES")
            .unwrap_or(-180),
        reference_date,
        params,
        max_report_chars: env.usize("ANALYTICS__MAX_REPORT_CHARS").unwrap_or(1500),
        plots_dir: PathBuf::from(
            env.str("ANALYTICS__PLOTS_DIR")
                .unwrap_or_else(|| "plots".to_string()),
        ),
    })
}

struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    fn str(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned().and_then(non_empty)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.str(key).map(|s| {
            matches!(
                s.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn u32(&self, key: &str) -> Option<u32> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn i32(&self, key: &str) -> Option<i32> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn usize(&self, key: &str) -> Option<usize> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn f64(&self, key: &str) -> Option<f64> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn f32(&self, key: &str) -> Option<f32> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn llm(&self, prefix: &str, fallback_key: &str, model: &str, prompt: &str) -> LlmSettings {
        LlmSettings {
            api_key: self
                .str(&format!("{prefix}__API_KEY"))
                .unwrap_or_else(|| fallback_key.to_string()),
            base_url: self
                .str(&format!("{prefix}__BASE_URL"))
                .unwrap_or_else(|| GROQ_BASE_URL.to_string()),
            model: self
                .str(&format!("{prefix}__MODEL"))
                .unwrap_or_else(|| model.to_string()),
            temperature: self.f32(&format!("{prefix}__TEMPERATURE")).unwrap_or(0.7),
            timeout: Duration::from_secs(self.u64(&format!("{prefix}__TIMEOUT")).unwrap_or(30)),
            prompt_name: self
                .str(&format!("{prefix}__PROMPT_NAME"))
                .unwrap_or_else(|| prompt.to_string()),
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }
        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

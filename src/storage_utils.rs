use crate::klines::LookbackWindow;
use anyhow::{Context, ensure};
use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

// CONFIGURATION STRUCTS

/// One tracked instrument: the provider symbol and the label shown to the user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub display_name: String,
}

impl InstrumentConfig {
    pub fn new(symbol: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            display_name: display_name.into(),
        }
    }
}

const DEFAULT_WATCHLIST: &[(&str, &str)] = &[
    ("^NSEI", "NIFTY 50"),
    ("^NSMIDCP", "NIFTY NEXT 50"),
    ("^NSEMDCP150", "NIFTY MIDCAP 150"),
    ("^NSEBANK", "NIFTY BANK"),
    ("^CNXIT", "NIFTY IT"),
    ("^CNXFIN", "NIFTY FINANCIAL SERVICES"),
    ("^CRSLDX", "NIFTY 500"),
    ("^BSESN", "SENSEX"),
    ("NIFTYSMLCAP250.NS", "NIFTY SMLCAP 250"),
    ("^SPX", "S&P 500"),
    ("MAGS", "MAGS"),
    ("^VIX", "VIX"),
    ("BTC-USD", "Bitcoin"),
    ("ETH-USD", "Ethereum"),
    ("SOXL", "SOXL"),
    ("AVGO", "Broadcom"),
];

pub fn default_watchlist() -> Vec<InstrumentConfig> {
    DEFAULT_WATCHLIST
        .iter()
        .map(|&(symbol, name)| InstrumentConfig::new(symbol, name))
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,  // Yahoo chart endpoint, symbol is appended
    pub lookback_days: u32, // e.g., 365 for a 52-week window
    pub interval: String,   // e.g., "1d"
    pub timeout_secs: u64,
    pub concurrency: usize, // in-flight requests
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
            lookback_days: LookbackWindow::FIFTY_TWO_WEEKS.days,
            interval: "1d".to_string(),
            timeout_secs: 10,
            concurrency: 4,
            user_agent: concat!("fall-screener/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ChartConfig {
    pub height: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self { height: 600 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    // Order of the watchlist is the order of the table.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<InstrumentConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub chart: ChartConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            fetch: FetchConfig::default(),
            chart: ChartConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads `config.json` from storage, writing the defaults first if it does not exist yet.
    pub async fn load_or_init(storage: &AsyncStorageManager) -> anyhow::Result<Self> {
        let config = if storage.exists("config").await? {
            storage
                .load::<AppConfig>("config")
                .await
                .context("reading config.json")?
        } else {
            let config = AppConfig::default();
            storage.save("config", &config).await?;
            tracing::info!(path = ?storage.base_dir.join("config.json"), "Wrote default config");
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.watchlist.is_empty(), "watchlist must not be empty");
        ensure!(self.fetch.lookback_days > 0, "fetch.lookback_days must be > 0");
        ensure!(self.fetch.timeout_secs > 0, "fetch.timeout_secs must be > 0");
        ensure!(self.fetch.concurrency > 0, "fetch.concurrency must be > 0");
        ensure!(!self.fetch.base_url.is_empty(), "fetch.base_url missing");

        let symbol_re = Regex::new(r"^[A-Za-z0-9^.=_-]+$")?;
        let mut seen = HashSet::new();
        for instrument in &self.watchlist {
            ensure!(
                symbol_re.is_match(&instrument.symbol),
                "invalid symbol {:?} in watchlist",
                instrument.symbol
            );
            ensure!(
                !instrument.display_name.trim().is_empty(),
                "symbol {} has an empty display name",
                instrument.symbol
            );
            ensure!(
                seen.insert(instrument.symbol.as_str()),
                "symbol {} appears more than once in watchlist",
                instrument.symbol
            );
        }
        Ok(())
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Creates a manager rooted next to the running executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);
        Self::new(base_dir).await
    }

    /// Creates a manager rooted at `base_dir`, creating the directory up front.
    pub async fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }
        Ok(Self { base_dir })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", filename))
    }

    pub async fn exists(&self, filename: &str) -> anyhow::Result<bool> {
        Ok(fs::try_exists(self.path_for(filename)).await?)
    }

    /// Saves any `Serialize` value as pretty JSON.
    /// Writes to a `.tmp` file and renames it so a crash never leaves a half-written file.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let final_path = self.path_for(filename);
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", filename));

        let json_bytes = serde_json::to_vec_pretty(data)?;
        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        // serde_json validates UTF-8 while parsing, so read raw bytes.
        let content = fs::read(self.path_for(filename)).await?;
        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }
}

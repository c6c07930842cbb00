use std::env;

/// Playlist served when neither a token nor a query parameter names one
pub const DEFAULT_M3U_URL: &str =
    "https://ipfs.io/ipns/k2k4r8oqlcjxsritt5mczkcn4mmvcmymbqw7113fz2flkrerfwfps004/data/listas/lista_iptv.m3u";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,

    // Playlist defaults
    pub default_m3u_url: String,
    pub default_target_ip: Option<String>,

    // Fetching
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub max_m3u_size_mb: usize,

    // Catalog
    pub catalog_page_size: usize,

    // Misc
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "7000".to_string())
                .parse()
                .unwrap_or(7000),

            // Playlist defaults
            default_m3u_url: env::var("DEFAULT_M3U_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_M3U_URL.to_string()),
            default_target_ip: env::var("DEFAULT_TARGET_IP")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),

            // Fetching
            fetch_timeout_ms: env::var("FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000), // 30 seconds

            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .unwrap_or(2),

            max_m3u_size_mb: env::var("MAX_M3U_SIZE_MB")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),

            // Catalog
            catalog_page_size: env::var("CATALOG_PAGE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(100),

            // Misc - Use VLC user agent to avoid IPTV server blocks
            user_agent: env::var("USER_AGENT")
                .unwrap_or_else(|_| "VLC/3.0.20 LibVLC/3.0.20".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

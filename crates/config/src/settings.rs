use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub jwt: JwtSettings,
    pub mediasoup: MediasoupSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Settings for verifying the join token carried on `joinRoom`. Issuing
/// tokens, registering users and storing profiles are external concerns —
/// this crate only ever decodes the `sub` claim out of a token it receives.
#[derive(Debug, Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediasoupSettings {
    pub num_workers: u32,
    pub listen_ip: String,
    pub announced_ip: Option<String>,
    /// Worker `i` gets the port range
    /// `[rtc_base_port + i * rtc_port_range_size, rtc_base_port + (i+1) * rtc_port_range_size - 1]`.
    pub rtc_base_port: u16,
    pub rtc_port_range_size: u16,
    pub max_peers_per_room: u32,
    pub initial_available_outgoing_bitrate: u32,
    pub min_available_outgoing_bitrate: u32,
    pub max_incoming_bitrate: u32,
    pub max_sctp_message_size: u32,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let default_workers = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(2)
            .max(2);

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("CONFERO"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3000)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("jwt.secret", std::env::var("JWT_SECRET").unwrap_or_default())?
            .set_default("jwt.issuer", "confero")?
            .set_default("mediasoup.num_workers", default_workers)?
            .set_default("mediasoup.listen_ip", "0.0.0.0")?
            .set_default(
                "mediasoup.announced_ip",
                std::env::var("ANNOUNCED_IP").ok(),
            )?
            .set_default("mediasoup.rtc_base_port", 20000)?
            .set_default("mediasoup.rtc_port_range_size", 1000)?
            .set_default("mediasoup.max_peers_per_room", 150)?
            .set_default("mediasoup.initial_available_outgoing_bitrate", 1_000_000)?
            .set_default("mediasoup.min_available_outgoing_bitrate", 600_000)?
            .set_default("mediasoup.max_incoming_bitrate", 1_500_000)?
            .set_default("mediasoup.max_sctp_message_size", 262_144)?
            .build()?;

        let settings: Settings = config.try_deserialize()?;

        if settings.jwt.secret.is_empty() {
            tracing::warn!("JWT_SECRET is not set; join tokens will fail verification");
        }
        if settings.mediasoup.announced_ip.is_none() {
            tracing::warn!("ANNOUNCED_IP is not set; ICE will fail for clients behind NAT");
        }

        Ok(settings)
    }
}

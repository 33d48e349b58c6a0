mod settings;

pub use settings::{AppSettings, JwtSettings, MediasoupSettings, Settings};

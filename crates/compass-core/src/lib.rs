pub mod config;

pub use config::{
    CompassConfig, ConsumerConfig, NotificationSettings, NotificationsConfig, ServerConfig,
    parse_duration,
};

pub mod settings;

pub use settings::{
    ApiKeys, CacheTtls, DailyReportSettings, FileConfig, Settings, TelegramSettings, ThresholdTable,
};

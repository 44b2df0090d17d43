pub mod night_radiation;
pub mod solar_position;
pub mod store_summary;

pub use night_radiation::{
    count_night_radiation, detect_night_anomalies, NightAnomalyTable, NightRadiationRow,
};
pub use solar_position::{apparent_elevation, SolarPosition, SolarPositionEngine};
pub use store_summary::{StoreAnalyzer, StoreSummary, VariableStats};

//! Chart data, its processing and persistence.
pub mod chart;
pub mod processor;
pub mod series;
pub mod storage;
pub mod transform;

pub use chart::{Chart, ChartConfig, ChartData, ChartRecord};
pub use processor::DataProcessor;
pub use series::{Axis, AxisMeta, Scale};
pub use transform::Transform;

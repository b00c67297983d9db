pub mod board;
pub mod chart;
pub mod condition;
pub mod config;
pub mod error;
pub mod indicator;
pub mod playbook;
pub mod state;
pub mod types;

pub use board::{ResultsBoard, TimeframeSnapshot};
pub use chart::{Candle, CandleField, CandleSeries, Chart, ChartBook, ChartSync, SharedChart};
pub use condition::{Condition, Operand, Operator, RawOperand};
pub use config::{parse_duration, Config, DataSource};
pub use error::{Error, Result};
pub use indicator::{IndicatorOutput, IndicatorParams, IndicatorProvider, IndicatorResult};
pub use playbook::{Playbook, PlaybookRegistry};
pub use state::{MemoryStateStore, SignalState, StateStore};
pub use types::*;

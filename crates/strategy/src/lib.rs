pub mod analysis;
pub mod config;
pub mod engine;
pub mod indicators;
pub mod registry;
pub mod resolver;
pub mod scenario;

pub use analysis::{run_analyses, Analysis, AnalysisInput};
pub use config::PlaybookFile;
pub use engine::{Action, ChartView, ExecutionContext, RunWindow, Strategy};
pub use indicators::BuiltinIndicators;
pub use registry::{Registry, TimeframeDecl};
pub use resolver::{DataSet, Resolved, Unresolved};
pub use scenario::{ScanWindow, Scenario};

pub mod binance;
pub mod dispatcher;
pub mod scheduler;
pub mod store;
pub mod subscription;
pub mod timeframe;

pub use binance::BinanceKlines;
pub use dispatcher::{Callback, Dispatcher};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use store::SqliteStateStore;
pub use subscription::Aggregate;
pub use timeframe::{TickContext, TickOutcome, Timeframe};

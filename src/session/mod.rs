mod state;
mod stats;

pub use self::{
	state::{Session, SessionState, SessionStateMachine},
	stats::{format_duration, DailyUsage, UsageStats, UsageTotals, UsageTracker},
};

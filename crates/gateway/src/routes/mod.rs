pub mod approvals;
pub mod evidence;
pub mod ledger;
pub mod policies;
pub mod runs;
pub mod telemetry;
pub mod webhooks;

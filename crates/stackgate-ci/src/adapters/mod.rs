//! Concrete validator adapters, one per tool output format.

mod command;
mod lint;
mod rule_scan;
mod simulation;

pub use command::CommandAdapter;
pub use lint::LintAdapter;
pub use rule_scan::RuleScanAdapter;
pub use simulation::SimulationAdapter;

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;

pub use domain::conversation::{pair_exchanges, Exchange, Turn, TurnRole};
pub use domain::event::StreamEvent;
pub use domain::scan::{ScanAction, ScanDirection, ScanResult};
pub use errors::{ApplicationError, InterfaceError};

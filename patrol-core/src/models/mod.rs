pub mod patrol;
pub mod pilot;
pub mod session;

pub use patrol::{ActiveSessionRow, PatrolDebrief, PatrolSummary};
pub use pilot::Pilot;
pub use session::Session;

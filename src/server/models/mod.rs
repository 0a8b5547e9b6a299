pub mod envelope;
pub mod table;
pub mod user;

pub use envelope::{AnalysisEnvelope, RiskLevel};
pub use table::{Cell, Table, TablePage};
pub use user::User;

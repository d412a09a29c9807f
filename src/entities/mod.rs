// Entity models read by the stage report
//
// Each entity comes with the narrow read trait the report needs; the SQLite
// implementations live in `db::SqliteStore`.

pub mod lead;
pub mod stage;

pub use lead::{owner_names, team_names, Lead, LeadStore};
pub use stage::{display_name, Stage, StageTable, UNDEFINED_STAGE};

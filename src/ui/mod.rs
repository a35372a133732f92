pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, error, header, info, location, phase, section, success, summary_row, warn};
pub use progress::{QueueProgress, Spinner};
pub use table::{match_table, reference_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};

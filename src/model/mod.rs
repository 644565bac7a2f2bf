pub use slug::*;
pub use stats::*;

mod slug;
mod stats;

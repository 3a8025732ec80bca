pub mod candidate;
pub mod intent;
pub mod metric;
pub mod schema;

pub use candidate::*;
pub use intent::*;
pub use metric::*;
pub use schema::*;

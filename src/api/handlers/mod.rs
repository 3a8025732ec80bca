pub mod metrics;
pub mod schema;
pub mod translate;

pub use translate::AppState;

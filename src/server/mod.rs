mod app;
mod middleware;
mod state;

pub use app::{create_app, run_server};
pub use state::AppState;

mod app;
mod extract;
mod middleware;
mod state;

pub use app::create_app;
pub use extract::{extract_token, AuthenticatedRecipient};
pub use middleware::{admin_admission, api_key_auth, connect_admission, replay_admission};
pub use state::AppState;

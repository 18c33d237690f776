// Authentication module
// Credential state, token lifecycle and refresh coordination

mod clock;
mod manager;
mod observer;
mod refresh;
mod state;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::SessionManager;
pub use observer::{Listener, Observers, Subscription};
pub use refresh::RefreshClient;
pub use state::{Credential, CredentialState, SAFETY_MARGIN_SECS};
pub use store::TokenStore;
pub use types::{Token, TokenResponse, DEFAULT_EXPIRES_IN, DEFAULT_TOKEN_TYPE};

pub mod auth;
pub mod catalog;
pub mod listening;
pub mod spotify;
pub mod token_manager;
pub mod vote_ledger;

pub use auth::AuthService;
pub use catalog::CatalogImporter;
pub use listening::ListeningService;
pub use spotify::{SpotifyApi, SpotifyClient};
pub use token_manager::TokenManager;
pub use vote_ledger::VoteLedger;

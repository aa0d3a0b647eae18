pub use self::client::{FetchError, FetchedPost, GraphClient, PostAuthor};
pub use self::signature::{
    HandshakeOutcome, app_secret_proof, evaluate_handshake, verify_signature,
};

pub mod client;
pub mod signature;

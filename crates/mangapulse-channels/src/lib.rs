//! # MangaPulse Channels
//!
//! Concrete implementations of the collaborator traits from
//! `mangapulse-core`: the FCM push transport, the JSON-file user registry,
//! and the MangaDex chapter source. The engine never depends on any of
//! these directly — swap them per deployment.

pub mod fcm;
pub mod mangadex;
pub mod registry;

pub use fcm::FcmPush;
pub use mangadex::MangaDexFetcher;
pub use registry::FileRegistry;

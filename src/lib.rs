//! Session core for the apiary storefront admin.
//!
//! A [`store::SessionStore`] holds the logged-in identity and its bearer
//! token, persisted through a [`storage::SessionStorage`] backend. At startup
//! a [`bootstrap::Bootstrapper`] restores the persisted session and
//! revalidates it against the identity service ([`api`]). The [`server`]
//! module is a reference implementation of that service.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod guard;
pub mod identity;
pub mod server;
pub mod storage;
pub mod store;

pub use api::{ApiError, HttpIdentityClient, IdentityService};
pub use bootstrap::Bootstrapper;
pub use identity::{AuthProvider, BearerToken, Session, SessionError, UserIdentity};
pub use storage::{FileStorage, MemoryStorage, SessionStorage};
pub use store::{AuthPhase, SessionSnapshot, SessionStore};

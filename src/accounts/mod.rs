//! User accounts: records, storage, passwords and the account flows.

pub mod avatar;
pub mod listing;
pub mod model;
pub mod otp;
pub mod password;
pub mod service;
pub mod store;

pub use avatar::AvatarFiles;
pub use listing::{ListQuery, Listing};
pub use model::{Principal, PrincipalId, Profile, ProfileUpdate, Role};
pub use service::{AccountError, AccountService};
pub use store::{InMemoryUserStore, StoreError, UserStore};

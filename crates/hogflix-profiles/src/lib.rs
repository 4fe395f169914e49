//! User profiles stored in the Supabase `profiles` table.
//!
//! [`ProfileFetcher`] is what the rest of the app talks to: it caches one
//! lookup per user, creates a default row for users who have none, and keeps
//! demo sessions entirely local.

mod error;
mod fetcher;
mod record;
mod store;

pub use error::{ProfileError, ProfileResult};
pub use fetcher::ProfileFetcher;
pub use record::{ProfileRecord, ProfileRow, ProfileUpdate, DEFAULT_LANGUAGE};
pub use store::{ProfileStore, SupabaseProfileStore};

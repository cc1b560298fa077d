// permissions module

pub mod resolve;
pub mod store;
pub mod types;

pub use resolve::{
    collection_matches, collections_overlap, decisive, is_allowed, resolve, rule_matches, Specificity,
};
pub use store::PermissionStore;
pub use types::{Effect, Permission, ScopeRule};

//! Application services shared by every front end

mod local_store;

pub use local_store::LocalStore;
pub(crate) use local_store::owning_household;

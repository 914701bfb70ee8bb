pub mod users;

pub use users::{StoreError, User, UserStore};

mod collection;
mod credentials;
mod item;
mod object_id;

pub use collection::Collection;
pub use credentials::Credentials;
pub use item::{Item, ItemStatus};
pub use object_id::ObjectId;

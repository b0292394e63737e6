// Active-record operations over schema-described entities

pub mod mutations;
pub mod traits;

pub use mutations::DeleteMode;
pub use traits::ActiveRecord;

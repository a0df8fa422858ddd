pub mod preview;
pub mod schema;
pub mod transfer;

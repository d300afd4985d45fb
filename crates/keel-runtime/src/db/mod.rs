mod store;

pub use store::{sqlite_file_path, Backend, Store};

mod commands;
mod handle;
mod queries;
mod schema;

pub use handle::StoreHandle;

/// Public constant for the default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

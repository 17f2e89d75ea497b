//! The record layer: table schemas, their byte layout, slotted pages, and a
//! heap-file cursor over them (C6 + C8).

pub mod layout;
pub mod schema;
pub mod slotted_page;
pub mod table_scan;

pub use layout::Layout;
pub use schema::{FieldType, Schema};
pub use slotted_page::SlottedPage;
pub use table_scan::{table_stats, TableScan, TableStats};

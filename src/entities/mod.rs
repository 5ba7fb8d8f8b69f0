pub mod address_binding;
pub mod entry;
pub mod pending_report;
pub mod source_checksum;

pub mod config;
pub mod extract;
pub mod history;
pub mod scan;
pub mod translate;
pub mod writeback;

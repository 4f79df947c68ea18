pub mod batch;
pub mod clean;
pub mod generate;
pub mod helper;
pub mod scan;

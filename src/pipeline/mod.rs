pub mod catalog;
pub mod link;
pub mod matcher;
pub mod replace;
pub mod scan;

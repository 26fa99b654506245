pub mod fill;
pub mod sanitize;
pub mod worker;

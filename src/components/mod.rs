pub mod history;
pub mod state;
pub mod tools;
pub mod viewport;

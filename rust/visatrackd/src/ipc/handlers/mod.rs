pub mod advisors;
pub mod core;
pub mod messages;
pub mod pipeline;
pub mod setup;
pub mod students;

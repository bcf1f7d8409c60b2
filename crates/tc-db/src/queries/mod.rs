pub mod calibration;
pub mod completions;
pub mod projects;
pub mod sessions;
pub mod spend_events;
pub mod tasks;

pub mod job;
pub mod run;
pub mod style;

pub mod cheating_logs;
pub mod exams;

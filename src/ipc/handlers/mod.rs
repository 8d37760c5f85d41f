pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod exams;
pub mod fees;
pub mod marks;
pub mod payroll;
pub mod reminders;
pub mod reports;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod years;

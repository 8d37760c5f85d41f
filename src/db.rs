use chrono::{Local, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE: &str = "school.sqlite3";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The school's calendar day, taken from the host's local clock.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Opens a connection to an existing workspace database without touching
/// the schema. Used by the background reminder thread.
pub fn connect(workspace: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(db_path(workspace))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = connect(workspace)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_number TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            date_of_birth TEXT,
            gender TEXT,
            address TEXT,
            guardian_name TEXT,
            guardian_phone TEXT,
            admission_date TEXT NOT NULL,
            user_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_user ON students(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            specialization TEXT,
            qualification TEXT,
            joining_date TEXT NOT NULL,
            user_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT UNIQUE,
            credits INTEGER NOT NULL DEFAULT 1,
            teacher_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            standard INTEGER NOT NULL,
            name TEXT NOT NULL,
            code TEXT,
            teacher_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_standard ON subjects(standard, name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sections(
            id TEXT PRIMARY KEY,
            class_name TEXT NOT NULL,
            section TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 40,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(class_name, section)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_section_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            course_id TEXT,
            roll_number INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_section_id) REFERENCES class_sections(id),
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, class_section_id, academic_year_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_year_class
         ON enrollments(academic_year_id, class_section_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_roll
         ON enrollments(class_section_id, academic_year_id, roll_number)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_heads(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            amount REAL NOT NULL,
            applicable_class TEXT,
            academic_year_id TEXT NOT NULL,
            due_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_heads_year ON fee_heads(academic_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_head_id TEXT NOT NULL,
            receipt_no INTEGER NOT NULL UNIQUE,
            amount_paid REAL NOT NULL,
            payment_date TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            transaction_id TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_head_id) REFERENCES fee_heads(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_head ON fee_payments(fee_head_id, status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_student ON fee_payments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_section_id TEXT NOT NULL,
            date TEXT NOT NULL,
            is_present INTEGER NOT NULL,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_section_id) REFERENCES class_sections(id),
            UNIQUE(student_id, class_section_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date
         ON attendance_records(class_section_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            course_id TEXT NOT NULL,
            exam_date TEXT NOT NULL,
            total_marks REAL NOT NULL DEFAULT 100,
            room TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mark_entries(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            grade_point REAL,
            letter_grade TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, exam_id, course_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mark_entries_exam ON mark_entries(exam_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS salaries(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            basic_salary REAL NOT NULL,
            allowances REAL NOT NULL DEFAULT 0,
            deductions REAL NOT NULL DEFAULT 0,
            net_salary REAL NOT NULL,
            payment_date TEXT,
            month TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reminder_logs(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_head_id TEXT,
            reminder_type TEXT NOT NULL,
            message TEXT NOT NULL,
            is_sent INTEGER NOT NULL DEFAULT 0,
            sent_at TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_reminder_logs_day(&conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_reminder_logs_once_per_day
         ON reminder_logs(student_id, reminder_type, reminder_day)",
        [],
    )?;

    Ok(conn)
}

// Early workspaces stored only created_at on reminder logs; the per-day key is
// derived from it.
fn ensure_reminder_logs_day(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "reminder_logs", "reminder_day")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE reminder_logs ADD COLUMN reminder_day TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    conn.execute(
        "UPDATE reminder_logs SET reminder_day = substr(created_at, 1, 10)",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let cols = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols.iter().any(|c| c == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, new_id()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_db_is_repeatable() {
        let ws = temp_dir("schoold-db-open");
        drop(open_db(&ws).expect("first open"));
        let conn = open_db(&ws).expect("second open");
        assert!(table_has_column(&conn, "reminder_logs", "reminder_day").expect("pragma"));
        assert!(table_has_column(&conn, "enrollments", "roll_number").expect("pragma"));
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn reminder_day_is_backfilled_for_old_tables() {
        let ws = temp_dir("schoold-db-migrate");
        {
            let conn = connect(&ws).expect("connect");
            conn.execute_batch(
                "CREATE TABLE reminder_logs(
                    id TEXT PRIMARY KEY,
                    student_id TEXT NOT NULL,
                    fee_head_id TEXT,
                    reminder_type TEXT NOT NULL,
                    message TEXT NOT NULL,
                    is_sent INTEGER NOT NULL DEFAULT 0,
                    sent_at TEXT,
                    created_at TEXT NOT NULL
                );
                INSERT INTO reminder_logs(id, student_id, reminder_type, message, created_at)
                VALUES('r1', 's1', 'FeeOverdue', 'm', '2026-03-04T10:00:00Z');",
            )
            .expect("seed old table");
        }
        let conn = open_db(&ws).expect("open migrates");
        let day: String = conn
            .query_row("SELECT reminder_day FROM reminder_logs WHERE id = 'r1'", [], |r| {
                r.get(0)
            })
            .expect("day");
        assert_eq!(day, "2026-03-04");
        let _ = std::fs::remove_dir_all(ws);
    }
}

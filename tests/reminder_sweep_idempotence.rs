mod test_support;

use serde_json::json;
use test_support::{days_from_today, str_field, Session};

#[test]
fn sweep_is_idempotent_per_day_and_skips_settled_students() {
    let mut s = Session::open("schoold-reminders");
    s.active_year("2025-26");
    let grade3 = s.class_section("Grade 3", "A");
    let grade4 = s.class_section("Grade 4", "A");
    let paid = s.student("RM-1", Some(&grade3));
    let partial = s.student("RM-2", Some(&grade3));
    let other = s.student("RM-3", Some(&grade4));

    let tuition = s.ok(
        "fees.heads.create",
        json!({ "name": "Tuition", "amount": 1000, "dueDate": days_from_today(-5) }),
    );
    let tuition_id = str_field(&tuition, "/feeHead/id");
    s.ok(
        "fees.heads.create",
        json!({
            "name": "Transport",
            "amount": 300,
            "dueDate": days_from_today(3),
            "applicableClass": "Grade 4"
        }),
    );
    s.ok(
        "fees.payments.record",
        json!({ "studentId": paid, "feeHeadId": tuition_id, "amountPaid": 1000 }),
    );
    s.ok(
        "fees.payments.record",
        json!({ "studentId": partial, "feeHeadId": tuition_id, "amountPaid": 400 }),
    );

    let first = s.ok("reminders.generate", json!({}));
    assert_eq!(first["ran"], json!(true));
    assert_eq!(first["outcome"]["overdueHeads"], json!(1));
    assert_eq!(first["outcome"]["upcomingHeads"], json!(1));
    assert_eq!(first["outcome"]["created"], json!(3));

    let second = s.ok("reminders.generate", json!({}));
    assert_eq!(second["outcome"]["created"], json!(0));
    assert_eq!(second["outcome"]["skippedExisting"], json!(3));

    let pending = s.ok("reminders.pending", json!({}));
    let rows = pending["reminders"].as_array().expect("reminders").clone();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r["studentId"] != json!(paid)));
    let overdue: Vec<_> = rows
        .iter()
        .filter(|r| r["reminderType"] == json!("FeeOverdue"))
        .collect();
    assert_eq!(overdue.len(), 2);
    assert!(overdue
        .iter()
        .all(|r| r["message"].as_str().unwrap_or_default().contains("overdue")));
    let upcoming: Vec<_> = rows
        .iter()
        .filter(|r| r["reminderType"] == json!("FeeUpcoming"))
        .collect();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0]["studentId"], json!(other));

    let sent = s.ok(
        "reminders.markSent",
        json!({ "ids": [rows[0]["id"].clone()] }),
    );
    assert_eq!(sent["updated"], json!(1));
    let left = s.ok("reminders.pending", json!({}));
    assert_eq!(left["reminders"].as_array().map(|v| v.len()), Some(2));

    // A new day gets its own reminders.
    let tomorrow = s.ok("reminders.generate", json!({ "asOf": days_from_today(1) }));
    assert_eq!(tomorrow["outcome"]["created"], json!(3));

    // Settling the head stops further overdue reminders for that student.
    s.ok(
        "fees.payments.record",
        json!({ "studentId": other, "feeHeadId": tuition_id, "amountPaid": 1000 }),
    );
    let later = s.ok("reminders.generate", json!({ "asOf": days_from_today(2) }));
    assert_eq!(later["outcome"]["created"], json!(2));

    let status = s.ok("reminders.status", json!({}));
    assert_eq!(status["enabled"], json!(false));
    assert_eq!(status["schedulerRunning"], json!(false));
    assert_eq!(status["sweepInProgress"], json!(false));
    assert_eq!(status["lastRun"]["outcome"]["created"], json!(2));

    s.close();
}

#[test]
fn inactive_heads_and_students_are_ignored() {
    let mut s = Session::open("schoold-reminders-inactive");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 7", "A");
    let stays = s.student("IN-1", Some(&class_id));
    let leaves = s.student("IN-2", Some(&class_id));
    let head = s.ok(
        "fees.heads.create",
        json!({ "name": "Exam fee", "amount": 250, "dueDate": days_from_today(-1) }),
    );
    s.ok("students.delete", json!({ "studentId": leaves }));

    let run = s.ok("reminders.generate", json!({}));
    assert_eq!(run["outcome"]["created"], json!(1));
    let pending = s.ok("reminders.pending", json!({}));
    assert_eq!(pending["reminders"][0]["studentId"], json!(stays));

    s.ok(
        "fees.heads.update",
        json!({
            "feeHeadId": str_field(&head, "/feeHead/id"),
            "name": "Exam fee",
            "amount": 250,
            "dueDate": days_from_today(-1),
            "isActive": false
        }),
    );
    let next = s.ok("reminders.generate", json!({ "asOf": days_from_today(1) }));
    assert_eq!(next["outcome"]["overdueHeads"], json!(0));
    assert_eq!(next["outcome"]["created"], json!(0));

    s.close();
}

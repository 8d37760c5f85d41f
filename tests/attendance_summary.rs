mod test_support;

use serde_json::json;
use test_support::{days_from_today, f64_field, Session};

#[test]
fn hundred_records_eighty_five_present() {
    let mut s = Session::open("schoold-attendance");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 6", "A");
    let students: Vec<String> = (0..10)
        .map(|i| s.student(&format!("AT-{:02}", i), Some(&class_id)))
        .collect();

    // Days 1..=5 ago have three absentees each, the rest are full.
    for ago in 1..=10i64 {
        let absent = if ago <= 5 { 3 } else { 0 };
        let entries: Vec<_> = students
            .iter()
            .enumerate()
            .map(|(i, id)| json!({ "studentId": id, "isPresent": i >= absent }))
            .collect();
        s.ok(
            "attendance.save",
            json!({ "classSectionId": class_id, "date": days_from_today(-ago), "entries": entries }),
        );
    }

    let overview = s.ok("reports.overview", json!({}));
    let att = &overview["attendance"];
    assert_eq!(att["totalRecords"], json!(100));
    assert_eq!(att["presentRecords"], json!(85));
    assert_eq!(f64_field(att, "/overallRate"), 85.0);
    assert_eq!(att["totalWorkingDays"], json!(10));
    assert_eq!(att["latestDate"], json!(days_from_today(-1)));
    let class_row = &att["classes"][0];
    assert_eq!(class_row["totalStudents"], json!(10));
    assert_eq!(class_row["present"], json!(7));
    assert_eq!(f64_field(class_row, "/attendanceRate"), 70.0);

    s.close();
}

#[test]
fn saving_a_day_twice_replaces_it() {
    let mut s = Session::open("schoold-attendance-replace");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 1", "C");
    let a = s.student("R-1", Some(&class_id));
    let b = s.student("R-2", Some(&class_id));
    let day = days_from_today(-2);

    let sheet = s.ok("attendance.sheet", json!({ "classSectionId": class_id, "date": day }));
    assert_eq!(sheet["students"].as_array().map(|v| v.len()), Some(2));
    assert_eq!(sheet["students"][0]["isPresent"], json!(true));

    s.ok(
        "attendance.save",
        json!({ "classSectionId": class_id, "date": day, "entries": [
            { "studentId": a, "isPresent": false },
            { "studentId": b, "isPresent": true }
        ]}),
    );
    let second = s.ok(
        "attendance.save",
        json!({ "classSectionId": class_id, "date": day, "entries": [
            { "studentId": a, "isPresent": true },
            { "studentId": b, "isPresent": true }
        ]}),
    );
    assert_eq!(second["replaced"], json!(2));

    let overview = s.ok("reports.overview", json!({}));
    assert_eq!(overview["attendance"]["totalRecords"], json!(2));
    assert_eq!(f64_field(&overview, "/attendance/overallRate"), 100.0);

    assert_eq!(
        s.err(
            "attendance.save",
            json!({ "classSectionId": class_id, "date": day, "entries": [
                { "studentId": a, "isPresent": true },
                { "studentId": a, "isPresent": false }
            ]})
        ),
        "validation_failed"
    );
    s.close();
}

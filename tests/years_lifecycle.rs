mod test_support;

use serde_json::json;
use test_support::{str_field, Session};

#[test]
fn active_year_resolution_and_switching() {
    let mut s = Session::open("schoold-years");

    let none = s.ok("years.active", json!({}));
    assert!(none["year"].is_null());
    assert_eq!(s.err("reports.overview", json!({})), "not_found");

    let y1 = s.ok(
        "years.create",
        json!({ "name": "2024-25", "startDate": "2024-04-01", "endDate": "2025-03-31", "isActive": true }),
    );
    let y1_id = str_field(&y1, "/year/id");
    let y2 = s.ok(
        "years.create",
        json!({ "name": "2025-26", "startDate": "2025-04-01", "endDate": "2026-03-31" }),
    );
    let y2_id = str_field(&y2, "/year/id");
    assert_eq!(y2["year"]["isActive"], json!(false));

    let active = s.ok("years.active", json!({}));
    assert_eq!(str_field(&active, "/year/id"), y1_id);

    s.ok("years.setActive", json!({ "yearId": y2_id }));
    let list = s.ok("years.list", json!({}));
    let actives: Vec<_> = list["years"]
        .as_array()
        .expect("years")
        .iter()
        .filter(|y| y["isActive"] == json!(true))
        .collect();
    assert_eq!(actives.len(), 1);
    assert_eq!(actives[0]["id"], json!(y2_id));

    // Unknown id leaves the active year untouched.
    assert_eq!(s.err("years.setActive", json!({ "yearId": "nope" })), "not_found");
    let still = s.ok("years.active", json!({}));
    assert_eq!(str_field(&still, "/year/id"), y2_id);

    s.close();
}

#[test]
fn year_validation_and_delete_rules() {
    let mut s = Session::open("schoold-years-validation");

    assert_eq!(
        s.err(
            "years.create",
            json!({ "name": "bad", "startDate": "2025-06-01", "endDate": "2025-06-01" })
        ),
        "validation_failed"
    );
    let y = s.ok(
        "years.create",
        json!({ "name": "2025-26", "startDate": "2025-04-01", "endDate": "2026-03-31", "isActive": true }),
    );
    let year_id = str_field(&y, "/year/id");
    assert_eq!(
        s.err(
            "years.create",
            json!({ "name": "2025-26", "startDate": "2026-04-01", "endDate": "2027-03-31" })
        ),
        "conflict"
    );
    assert_eq!(s.err("years.delete", json!({ "yearId": year_id })), "conflict");

    let spare = s.ok(
        "years.create",
        json!({ "name": "spare", "startDate": "2030-04-01", "endDate": "2031-03-31" }),
    );
    s.ok("years.delete", json!({ "yearId": str_field(&spare, "/year/id") }));

    s.close();
}

#[test]
fn rollover_copies_enrollments_once() {
    let mut s = Session::open("schoold-rollover");
    let from = s.active_year("current");
    let to = s.ok(
        "years.create",
        json!({ "name": "next", "startDate": "2090-04-01", "endDate": "2091-03-31" }),
    );
    let to_id = str_field(&to, "/year/id");
    let class_id = s.class_section("Grade 5", "A");
    let a = s.student("A-001", Some(&class_id));
    s.student("A-002", Some(&class_id));

    let first = s.ok("years.rollover", json!({ "fromYearId": from, "toYearId": to_id }));
    assert_eq!(first["copied"], json!(2));
    assert_eq!(first["skipped"], json!(0));

    let again = s.ok("years.rollover", json!({ "fromYearId": from, "toYearId": to_id }));
    assert_eq!(again["copied"], json!(0));
    assert_eq!(again["skipped"], json!(2));

    let next_year = s.ok(
        "enrollments.list",
        json!({ "academicYearId": to_id, "classSectionId": class_id }),
    );
    let rows = next_year["enrollments"].as_array().expect("enrollments");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r["studentId"] == json!(a)));

    assert_eq!(
        s.err("years.rollover", json!({ "fromYearId": from, "toYearId": from })),
        "validation_failed"
    );
    s.close();
}

mod test_support;

use serde_json::json;
use test_support::{days_from_today, f64_field, str_field, Session};

fn enrolled_student(s: &mut Session, admission: &str, class_id: &str, course_id: &str) -> String {
    let created = s.ok(
        "students.create",
        json!({
            "admissionNumber": admission,
            "firstName": "Pupil",
            "lastName": admission,
            "classSectionId": class_id,
            "courseId": course_id
        }),
    );
    str_field(&created, "/student/id")
}

#[test]
fn gpa_buckets_pass_fail_and_exam_results() {
    let mut s = Session::open("schoold-gpa");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 9", "A");
    let course_id = s.course("Mathematics", "MATH9", 4);
    let ids: Vec<String> = (1..=4)
        .map(|i| enrolled_student(&mut s, &format!("G-{}", i), &class_id, &course_id))
        .collect();
    let exam = s.ok(
        "exams.create",
        json!({ "name": "Midterm", "courseId": course_id, "examDate": days_from_today(-10) }),
    );
    let exam_id = str_field(&exam, "/exam/id");

    assert_eq!(
        s.err(
            "marks.save",
            json!({ "examId": exam_id, "entries": [{ "studentId": ids[0], "marksObtained": 120 }] })
        ),
        "validation_failed"
    );
    let saved = s.ok(
        "marks.save",
        json!({ "examId": exam_id, "entries": [
            { "studentId": ids[0], "marksObtained": 95 },
            { "studentId": ids[1], "marksObtained": 72 },
            { "studentId": ids[2], "marksObtained": 20 }
        ]}),
    );
    assert_eq!(saved["saved"], json!(3));

    let sheet = s.ok("marks.sheet", json!({ "examId": exam_id }));
    assert_eq!(sheet["students"].as_array().map(|v| v.len()), Some(4));
    assert_eq!(sheet["stats"]["entered"], json!(3));
    assert_eq!(f64_field(&sheet, "/stats/highest"), 95.0);

    let overview = s.ok("reports.overview", json!({}));
    assert!(overview["warnings"].as_array().expect("warnings").is_empty());
    assert_eq!(
        overview["passFail"],
        json!({ "totalStudents": 4, "pass": 2, "fail": 1, "notEvaluated": 1 })
    );
    let buckets = overview["gpa"]["distribution"].as_array().expect("buckets");
    let count_of = |label: &str| {
        buckets
            .iter()
            .find(|b| b["range"] == json!(label))
            .map(|b| b["count"].clone())
    };
    assert_eq!(count_of("3.5 - 4.0"), Some(json!(1)));
    assert_eq!(count_of("3.0 - 3.49"), Some(json!(1)));
    assert_eq!(count_of("Below 2.0"), Some(json!(1)));
    assert_eq!(f64_field(&overview, "/gpa/averageGpa"), 2.43);
    assert_eq!(f64_field(&overview, "/gpa/highestGpa"), 4.0);

    let result = &overview["examResults"][0];
    assert_eq!(f64_field(result, "/average"), 62.3);
    assert_eq!(f64_field(result, "/highest"), 95.0);
    assert_eq!(f64_field(result, "/lowest"), 20.0);
    assert_eq!(f64_field(result, "/passRate"), 66.7);
    assert_eq!(overview["topStudents"][0]["studentId"], json!(ids[0]));

    let class_result = s.ok(
        "reports.classResult",
        json!({ "examId": exam_id, "classSectionId": class_id }),
    );
    assert_eq!(f64_field(&class_result, "/average"), 62.3);
    assert_eq!(f64_field(&class_result, "/passRate"), 66.7);
    assert_eq!(f64_field(&class_result, "/averageGpa"), 2.43);

    let card = s.ok("reports.studentCard", json!({ "studentId": ids[1] }));
    assert_eq!(f64_field(&card, "/gpa"), 3.3);
    assert_eq!(f64_field(&card, "/weightedGpa"), 3.3);
    assert_eq!(card["result"], json!("PASS"));
    let failing = s.ok("reports.studentCard", json!({ "studentId": ids[2] }));
    assert_eq!(failing["result"], json!("FAIL"));
    let unmarked = s.ok("reports.studentCard", json!({ "studentId": ids[3] }));
    assert_eq!(unmarked["result"], json!("NOT_EVALUATED"));

    s.close();
}

#[test]
fn withdrawn_graded_students_stay_out_of_pass_fail() {
    let mut s = Session::open("schoold-gpa-mismatch");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 10", "A");
    let course_id = s.course("Physics", "PHY10", 3);
    let ids: Vec<String> = (1..=3)
        .map(|i| enrolled_student(&mut s, &format!("M-{}", i), &class_id, &course_id))
        .collect();
    let exam = s.ok(
        "exams.create",
        json!({ "name": "Unit test", "courseId": course_id, "examDate": days_from_today(-3) }),
    );
    let exam_id = str_field(&exam, "/exam/id");
    s.ok(
        "marks.save",
        json!({ "examId": exam_id, "entries": [
            { "studentId": ids[0], "marksObtained": 90 },
            { "studentId": ids[1], "marksObtained": 90 }
        ]}),
    );

    let student = s.ok("students.get", json!({ "studentId": ids[1] }));
    let enrollment_id = str_field(&student, "/student/enrollments/0/id");
    s.ok("enrollments.withdraw", json!({ "enrollmentId": enrollment_id }));

    let overview = s.ok("reports.overview", json!({}));
    assert_eq!(
        overview["passFail"],
        json!({ "totalStudents": 2, "pass": 1, "fail": 0, "notEvaluated": 1 })
    );
    let warnings = overview["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap_or_default().contains("not enrolled"));

    // A soft-deleted student drops out the same way.
    s.ok("students.delete", json!({ "studentId": ids[0] }));
    let overview = s.ok("reports.overview", json!({}));
    assert_eq!(
        overview["passFail"],
        json!({ "totalStudents": 1, "pass": 0, "fail": 0, "notEvaluated": 1 })
    );

    s.close();
}

#[test]
fn grading_calculator_methods() {
    let mut s = Session::open("schoold-grading");
    let grade = s.ok("grading.grade", json!({ "marks": 72 }));
    assert_eq!(grade["letter"], json!("B+"));
    assert_eq!(f64_field(&grade, "/gradePoint"), 3.3);
    assert_eq!(grade["pass"], json!(true));

    let scaled = s.ok("grading.grade", json!({ "marks": 16, "totalMarks": 50 }));
    assert_eq!(scaled["letter"], json!("F"));
    assert_eq!(scaled["pass"], json!(false));

    let gpa = s.ok(
        "grading.gpa",
        json!({ "entries": [
            { "gradePoint": 4.0, "credits": 3 },
            { "gradePoint": 2.0, "credits": 1 }
        ]}),
    );
    assert_eq!(f64_field(&gpa, "/gpa"), 3.5);
    assert_eq!(gpa["letter"], json!("B+"));

    let empty = s.ok("grading.gpa", json!({ "entries": [] }));
    assert_eq!(f64_field(&empty, "/gpa"), 0.0);
    s.close();
}

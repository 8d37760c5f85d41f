mod test_support;

use serde_json::json;
use test_support::{days_from_today, f64_field, str_field, today, Session};

#[test]
fn records_reject_duplicates_and_bad_input() {
    let mut s = Session::open("schoold-crud");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 1", "A");
    assert_eq!(
        s.err("classes.create", json!({ "className": "Grade 1", "section": "A" })),
        "conflict"
    );
    assert_eq!(
        s.err("classes.create", json!({ "className": "Grade 1", "section": "B", "capacity": 0 })),
        "validation_failed"
    );
    s.course("English", "ENG1", 2);
    assert_eq!(
        s.err("courses.create", json!({ "name": "English II", "code": "ENG1", "credits": 2 })),
        "conflict"
    );

    let student_id = s.student("CR-1", Some(&class_id));
    let dup = s.call(
        "students.create",
        json!({ "admissionNumber": "CR-1", "firstName": "A", "lastName": "B" }),
    );
    assert_eq!(dup["error"]["code"], json!("conflict"));
    assert_eq!(dup["error"]["details"]["field"], json!("admissionNumber"));
    assert_eq!(
        s.err("students.create", json!({ "firstName": "A", "lastName": "B" })),
        "bad_params"
    );
    assert_eq!(
        s.err(
            "students.create",
            json!({ "admissionNumber": "   ", "firstName": "A", "lastName": "B" })
        ),
        "validation_failed"
    );
    assert_eq!(
        s.err(
            "students.create",
            json!({
                "admissionNumber": "CR-9", "firstName": "A", "lastName": "B",
                "dateOfBirth": days_from_today(5)
            })
        ),
        "validation_failed"
    );
    assert_eq!(
        s.err(
            "enrollments.create",
            json!({ "studentId": student_id, "classSectionId": class_id })
        ),
        "conflict"
    );
    assert_eq!(
        s.err("classes.delete", json!({ "classSectionId": class_id })),
        "conflict"
    );
    assert_eq!(s.err("students.get", json!({ "studentId": "missing" })), "not_found");

    let removed = s.ok("students.delete", json!({ "studentId": student_id }));
    assert_eq!(removed["enrollmentsWithdrawn"], json!(1));
    let listed = s.ok("students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|v| v.len()), Some(0));

    s.close();
}

#[test]
fn enrollment_roll_numbers_follow_the_class() {
    let mut s = Session::open("schoold-rolls");
    s.active_year("2025-26");
    let class_id = s.class_section("Grade 2", "A");
    for i in 0..3 {
        s.student(&format!("RL-{}", i), Some(&class_id));
    }
    let late = s.student("RL-late", None);
    let enrolled = s.ok(
        "enrollments.create",
        json!({ "studentId": late, "classSectionId": class_id }),
    );
    assert_eq!(enrolled["enrollment"]["rollNumber"], json!(4));
    let other = s.student("RL-other", None);
    assert_eq!(
        s.err(
            "enrollments.create",
            json!({ "studentId": other, "classSectionId": class_id, "rollNumber": 2 })
        ),
        "conflict"
    );
    s.close();
}

#[test]
fn payroll_exam_and_monthly_attendance_flows() {
    let mut s = Session::open("schoold-misc");
    s.active_year("2025-26");
    let teacher = s.ok(
        "teachers.create",
        json!({ "employeeId": "EMP-1", "firstName": "Meera", "lastName": "Iyer" }),
    );
    let teacher_id = str_field(&teacher, "/teacher/id");
    assert_eq!(
        s.err(
            "teachers.create",
            json!({ "employeeId": "EMP-1", "firstName": "X", "lastName": "Y" })
        ),
        "conflict"
    );

    let salary = s.ok(
        "salaries.create",
        json!({
            "teacherId": teacher_id, "basicSalary": 40000, "allowances": 5000,
            "deductions": 2000, "month": "2025-06"
        }),
    );
    assert_eq!(f64_field(&salary, "/salary/netSalary"), 43000.0);
    assert_eq!(salary["salary"]["status"], json!("Pending"));
    assert_eq!(
        s.err(
            "salaries.create",
            json!({ "teacherId": teacher_id, "basicSalary": 100, "deductions": 500, "month": "2025-06" })
        ),
        "validation_failed"
    );
    let paid = s.ok(
        "salaries.markPaid",
        json!({ "salaryId": str_field(&salary, "/salary/id") }),
    );
    assert_eq!(paid["salary"]["status"], json!("Paid"));
    assert_eq!(paid["salary"]["paymentDate"], json!(today().to_string()));

    let class_id = s.class_section("Grade 3", "A");
    let course_id = s.course("Science", "SCI3", 3);
    let student_id = s.student("MS-1", Some(&class_id));
    let exam = s.ok(
        "exams.create",
        json!({ "name": "Quiz", "courseId": course_id, "examDate": days_from_today(-1), "totalMarks": 20 }),
    );
    let exam_id = str_field(&exam, "/exam/id");
    s.ok(
        "marks.save",
        json!({ "examId": exam_id, "entries": [{ "studentId": student_id, "marksObtained": 18 }] }),
    );
    let removed = s.ok("exams.delete", json!({ "examId": exam_id }));
    assert_eq!(removed["marksDeleted"], json!(1));

    let day = today();
    s.ok(
        "attendance.save",
        json!({
            "classSectionId": class_id,
            "date": day.to_string(),
            "entries": [{ "studentId": student_id, "isPresent": true }]
        }),
    );
    let month = s.ok(
        "reports.attendanceMonth",
        json!({
            "classSectionId": class_id,
            "year": chrono::Datelike::year(&day),
            "month": chrono::Datelike::month(&day)
        }),
    );
    assert_eq!(month["workingDays"], json!(1));
    assert_eq!(month["students"][0]["present"], json!(1));
    assert_eq!(f64_field(&month, "/students/0/percentage"), 100.0);
    assert_eq!(
        s.err(
            "reports.attendanceMonth",
            json!({ "classSectionId": class_id, "year": 2025, "month": 13 })
        ),
        "validation_failed"
    );

    s.close();
}

#[test]
fn subjects_are_grouped_by_standard_and_searchable() {
    let mut s = Session::open("schoold-subjects");
    let teacher = s.ok(
        "teachers.create",
        json!({ "employeeId": "EMP-S1", "firstName": "Ravi", "lastName": "Kumar" }),
    );
    let teacher_id = str_field(&teacher, "/teacher/id");

    let science = s.ok(
        "subjects.create",
        json!({ "standard": 8, "name": "Science", "code": "SCI8", "teacherId": teacher_id }),
    );
    assert_eq!(science["subject"]["teacherName"], json!("Ravi Kumar"));
    let science_id = str_field(&science, "/subject/id");
    s.ok("subjects.create", json!({ "standard": 8, "name": "Algebra", "code": "MAT8" }));
    s.ok("subjects.create", json!({ "standard": 3, "name": "Drawing" }));

    assert_eq!(
        s.err("subjects.create", json!({ "standard": 13, "name": "Calculus" })),
        "validation_failed"
    );
    assert_eq!(s.err("subjects.create", json!({ "name": "Calculus" })), "bad_params");
    assert_eq!(
        s.err(
            "subjects.create",
            json!({ "standard": 5, "name": "History", "code": "HISTORY-STANDARD-FIVE" })
        ),
        "validation_failed"
    );

    let all = s.ok("subjects.list", json!({}));
    let names: Vec<&str> = all["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .filter_map(|v| v["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Drawing", "Algebra", "Science"]);
    assert_eq!(all["standards"], json!([3, 8]));

    let eighth = s.ok("subjects.list", json!({ "standard": 8 }));
    assert_eq!(eighth["subjects"].as_array().map(|v| v.len()), Some(2));
    let by_code = s.ok("subjects.list", json!({ "search": "mat8" }));
    assert_eq!(by_code["subjects"][0]["name"], json!("Algebra"));

    s.ok("teachers.delete", json!({ "teacherId": teacher_id }));
    assert_eq!(
        s.err(
            "subjects.update",
            json!({ "subjectId": science_id, "standard": 9, "name": "Science", "teacherId": teacher_id })
        ),
        "validation_failed"
    );
    let moved = s.ok(
        "subjects.update",
        json!({ "subjectId": science_id, "standard": 9, "name": "General Science" }),
    );
    assert_eq!(moved["subject"]["standard"], json!(9));
    assert_eq!(moved["subject"]["teacherId"], json!(null));

    assert_eq!(
        s.err_as(json!({ "userId": "t", "roles": ["Teacher"] }), "subjects.list", json!({})),
        "forbidden"
    );
    s.ok("subjects.delete", json!({ "subjectId": science_id }));
    assert_eq!(s.err("subjects.delete", json!({ "subjectId": science_id })), "not_found");
    s.close();
}

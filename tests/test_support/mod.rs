#![allow(dead_code)]

use chrono::{Duration, Local, NaiveDate};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env("SCHOOLD_LOG_LEVEL", "off")
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Sends one request, optionally on behalf of `actor`, and reads the reply.
pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    actor: Option<Value>,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(actor) = actor {
        payload["actor"] = actor;
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    request_as(stdin, reader, id, method, params, None)
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(Value::Null)
}

/// Error code of a request that is expected to fail.
pub fn request_err_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
    actor: Option<Value>,
) -> String {
    let value = request_as(stdin, reader, id, method, params, actor);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> String {
    request_err_as(stdin, reader, id, method, params, None)
}

pub fn str_field(v: &Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string at {} in {}", pointer, v))
        .to_string()
}

pub fn f64_field(v: &Value, pointer: &str) -> f64 {
    v.pointer(pointer)
        .and_then(|x| x.as_f64())
        .unwrap_or_else(|| panic!("missing number at {} in {}", pointer, v))
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn days_from_today(offset: i64) -> String {
    (today() + Duration::days(offset)).to_string()
}

/// Connected sidecar with a selected workspace.
pub struct Session {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    pub workspace: PathBuf,
    next_id: u64,
}

impl Session {
    pub fn open(prefix: &str) -> Session {
        let workspace = temp_dir(prefix);
        Session::open_at(workspace)
    }

    pub fn open_at(workspace: PathBuf) -> Session {
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Session {
            child,
            stdin,
            reader,
            workspace,
            next_id: 0,
        };
        let path = s.workspace.to_string_lossy().to_string();
        s.ok("workspace.select", json!({ "path": path }));
        s
    }

    fn id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.id();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let id = self.id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn err(&mut self, method: &str, params: Value) -> String {
        let id = self.id();
        request_err(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn ok_as(&mut self, actor: Value, method: &str, params: Value) -> Value {
        let id = self.id();
        let value = request_as(
            &mut self.stdin,
            &mut self.reader,
            &id,
            method,
            params,
            Some(actor),
        );
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    pub fn err_as(&mut self, actor: Value, method: &str, params: Value) -> String {
        let id = self.id();
        request_err_as(
            &mut self.stdin,
            &mut self.reader,
            &id,
            method,
            params,
            Some(actor),
        )
    }

    /// Active year spanning roughly six months either side of today.
    pub fn active_year(&mut self, name: &str) -> String {
        let year = self.ok(
            "years.create",
            json!({
                "name": name,
                "startDate": days_from_today(-180),
                "endDate": days_from_today(180),
                "isActive": true
            }),
        );
        str_field(&year, "/year/id")
    }

    pub fn class_section(&mut self, class_name: &str, section: &str) -> String {
        let c = self.ok(
            "classes.create",
            json!({ "className": class_name, "section": section }),
        );
        str_field(&c, "/classSection/id")
    }

    pub fn course(&mut self, name: &str, code: &str, credits: i64) -> String {
        let c = self.ok(
            "courses.create",
            json!({ "name": name, "code": code, "credits": credits }),
        );
        str_field(&c, "/course/id")
    }

    /// Creates a student, enrolled in `class_id` for the active year when given.
    pub fn student(&mut self, admission: &str, class_id: Option<&str>) -> String {
        let mut params = json!({
            "admissionNumber": admission,
            "firstName": "Student",
            "lastName": admission,
        });
        if let Some(c) = class_id {
            params["classSectionId"] = json!(c);
        }
        let s = self.ok("students.create", params);
        str_field(&s, "/student/id")
    }

    pub fn close(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.workspace);
    }
}

use once_cell::sync::Lazy;
use regex::Regex;

use crate::event::{ObjectMap, Value};
use crate::object;

static SYSLOG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<(\d+)>(\w{3} [ 0-9]{2} [0-9:]{8}) (.*)$").expect("syslog line pattern")
});

// Content shapes, tried in order: host+program, host only, program only.
static HOST_PROGRAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9._-]*[^:]) (\S+?)(\[(\d+)\])?: (.*)$").expect("host/program pattern")
});
static HOST_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9._-]+) (\S+[^:] .*)$").expect("host-only pattern"));
static PROGRAM_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+?)(\[(\d+)\])?: (.*)$").expect("program-only pattern"));

const SEVERITIES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

const FACILITIES: [&str; 24] = [
    "kern",
    "user",
    "mail",
    "daemon",
    "auth",
    "syslog",
    "lpr",
    "news",
    "uucp",
    "cron",
    "authpriv",
    "ftp",
    "reserved12",
    "reserved13",
    "reserved14",
    "reserved15",
    "local0",
    "local1",
    "local2",
    "local3",
    "local4",
    "local5",
    "local6",
    "local7",
];

/// Attempts to pull RFC3164-style syslog structure out of a message. On a
/// match, returns the remaining message body and a `{syslog: {…}}` subtree
/// with null fields omitted; otherwise returns the message untouched with an
/// empty map.
pub fn parse(message: &str) -> (String, ObjectMap) {
    let captures = match SYSLOG_LINE.captures(message) {
        Some(captures) => captures,
        None => return (message.to_string(), ObjectMap::new()),
    };

    let priority: u8 = match captures[1].parse() {
        Ok(priority) => priority,
        Err(_) => return (message.to_string(), ObjectMap::new()),
    };
    let timestamp = captures[2].to_string();
    let content = &captures[3];

    let severity = usize::from(priority % 8);
    let facility = usize::from(priority / 8);

    let (hostname, program, pid, body) = split_content(content);

    let mut fields = object! {
        "timestamp" => timestamp,
        "severity_id" => severity as i64,
        "severity_name" => SEVERITIES[severity],
        "facility_id" => facility as i64,
    };
    if let Some(name) = FACILITIES.get(facility) {
        fields.insert("facility_name".into(), Value::from(*name));
    }
    if let Some(hostname) = hostname {
        fields.insert("hostname".into(), Value::from(hostname));
    }
    if let Some(program) = program {
        fields.insert("program".into(), Value::from(program));
    }
    if let Some(pid) = pid {
        fields.insert("pid".into(), Value::Integer(pid));
    }

    (body, object! { "syslog" => fields })
}

fn split_content(content: &str) -> (Option<String>, Option<String>, Option<i64>, String) {
    if let Some(captures) = HOST_PROGRAM.captures(content) {
        let pid = captures.get(4).and_then(|m| m.as_str().parse().ok());
        return (
            Some(captures[1].to_string()),
            Some(captures[2].to_string()),
            pid,
            captures[5].to_string(),
        );
    }
    if let Some(captures) = HOST_ONLY.captures(content) {
        return (
            Some(captures[1].to_string()),
            None,
            None,
            captures[2].to_string(),
        );
    }
    if let Some(captures) = PROGRAM_ONLY.captures(content) {
        let pid = captures.get(3).and_then(|m| m.as_str().parse().ok());
        return (
            None,
            Some(captures[1].to_string()),
            pid,
            captures[4].to_string(),
        );
    }
    (None, None, None, content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syslog_fields(map: &ObjectMap) -> &ObjectMap {
        map.get("syslog").and_then(Value::as_map).unwrap()
    }

    #[test]
    fn full_line_with_host_program_and_pid() {
        let (message, fields) = parse("<134>May  1 12:34:56 host1 prog[42]: hello");
        assert_eq!(message, "hello");
        let syslog = syslog_fields(&fields);
        assert_eq!(syslog.get("severity_id"), Some(&Value::Integer(6)));
        assert_eq!(syslog.get("severity_name"), Some(&Value::from("info")));
        assert_eq!(syslog.get("facility_id"), Some(&Value::Integer(16)));
        assert_eq!(syslog.get("facility_name"), Some(&Value::from("local0")));
        assert_eq!(syslog.get("hostname"), Some(&Value::from("host1")));
        assert_eq!(syslog.get("program"), Some(&Value::from("prog")));
        assert_eq!(syslog.get("pid"), Some(&Value::Integer(42)));
        assert_eq!(
            syslog.get("timestamp"),
            Some(&Value::from("May  1 12:34:56"))
        );
    }

    #[test]
    fn program_without_pid() {
        let (message, fields) = parse("<13>Jun 10 01:02:03 web01 cron: job started");
        assert_eq!(message, "job started");
        let syslog = syslog_fields(&fields);
        assert_eq!(syslog.get("hostname"), Some(&Value::from("web01")));
        assert_eq!(syslog.get("program"), Some(&Value::from("cron")));
        assert_eq!(syslog.get("pid"), None);
        assert_eq!(syslog.get("severity_name"), Some(&Value::from("notice")));
        assert_eq!(syslog.get("facility_name"), Some(&Value::from("user")));
    }

    #[test]
    fn host_without_program() {
        let (message, fields) = parse("<34>Oct 11 22:14:15 mymachine su root failed on console");
        assert_eq!(message, "su root failed on console");
        let syslog = syslog_fields(&fields);
        assert_eq!(syslog.get("hostname"), Some(&Value::from("mymachine")));
        assert_eq!(syslog.get("program"), None);
        assert_eq!(syslog.get("severity_name"), Some(&Value::from("crit")));
        assert_eq!(syslog.get("facility_name"), Some(&Value::from("auth")));
    }

    #[test]
    fn program_without_host() {
        let (message, fields) = parse("<30>Jan  2 03:04:05 dockerd[99]: pulled image");
        assert_eq!(message, "pulled image");
        let syslog = syslog_fields(&fields);
        assert_eq!(syslog.get("program"), Some(&Value::from("dockerd")));
        assert_eq!(syslog.get("pid"), Some(&Value::Integer(99)));
    }

    #[test]
    fn bare_content_keeps_everything_in_message() {
        let (message, fields) = parse("<7>Feb  3 04:05:06 ");
        assert_eq!(message, "");
        let syslog = syslog_fields(&fields);
        assert_eq!(syslog.get("hostname"), None);
        assert_eq!(syslog.get("program"), None);
        assert_eq!(syslog.get("severity_name"), Some(&Value::from("debug")));
    }

    #[test]
    fn non_syslog_message_passes_through() {
        let (message, fields) = parse("plain application output");
        assert_eq!(message, "plain application output");
        assert!(fields.is_empty());
    }
}

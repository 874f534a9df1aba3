//! Line-protocol encoding.
//!
//! Pure string building, no I/O. The flush pipeline calls
//! [`encode_batch`]; the escaping helpers are public so downstream code
//! can pre-compute keys if it wants to.

use crate::measurement::{FieldValue, Measurement};

// <measurement>[,<tag_key>=<tag_value>...] <field_key>=<field_value>[,...] <timestamp>
//
// Measurement names escape commas and spaces. Tag keys, tag values and
// field keys additionally escape equals signs. String field values are
// wrapped in double quotes exactly once, with inner quotes and backslashes
// escaped; integers carry the `i` suffix.

/// Escapes a measurement name for the line protocol.
pub fn escape_measurement(name: &str) -> String {
    escape(name, &[',', ' '])
}

/// Escapes a tag key, tag value or field key for the line protocol.
pub fn escape_tag(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            // Line protocol is newline-framed; a raw CR/LF inside a value
            // would split the entry.
            '\n' | '\r' => out.push(' '),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn write_field_value(buffer: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(f) => buffer.push_str(&f.to_string()),
        FieldValue::Integer(i) => {
            buffer.push_str(&i.to_string());
            buffer.push('i');
        }
        FieldValue::Boolean(b) => buffer.push_str(if *b { "true" } else { "false" }),
        FieldValue::Text(s) => {
            buffer.push('"');
            for c in s.chars() {
                match c {
                    '"' | '\\' => {
                        buffer.push('\\');
                        buffer.push(c);
                    }
                    '\n' | '\r' => buffer.push(' '),
                    c => buffer.push(c),
                }
            }
            buffer.push('"');
        }
    }
}

/// Appends one measurement as a single line, newline terminated.
pub fn write_measurement_line(buffer: &mut String, measurement: &Measurement) {
    buffer.push_str(&escape_measurement(measurement.name()));

    for (key, value) in measurement.tags() {
        buffer.push(',');
        buffer.push_str(&escape_tag(key));
        buffer.push('=');
        buffer.push_str(&escape_tag(value));
    }

    buffer.push(' ');
    let mut first = true;
    for (key, value) in measurement.fields() {
        if first {
            first = false;
        } else {
            buffer.push(',');
        }
        buffer.push_str(&escape_tag(key));
        buffer.push('=');
        write_field_value(buffer, value);
    }

    buffer.push(' ');
    buffer.push_str(&measurement.timestamp().to_string());
    buffer.push('\n');
}

/// Encodes a batch into the newline-delimited wire body, preserving
/// recording order. An empty batch yields an empty string; callers
/// short-circuit on that instead of issuing a network call.
pub fn encode_batch(measurements: &[Measurement]) -> String {
    let mut output = String::new();
    for measurement in measurements {
        write_measurement_line(&mut output, measurement);
    }
    output
}

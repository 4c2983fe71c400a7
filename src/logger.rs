/*
 * This file is part of Crossfan.
 *
 * Copyright (C) 2025 Crossfan contributors
 *
 * Crossfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Crossfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Crossfan. If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-lines event log.
//!
//! Every record is one line: `{"ts_ms": .., "event": .., "data": ..}`.
//! Nothing is written until a sink is installed with [`init_logging`] or
//! [`init_with_writer`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use serde_json::{json, Value};

pub const DEFAULT_LOG_PATH: &str = "/var/log/crossfan/events.json";
const FALLBACK_LOG_PATH: &str = "/tmp/crossfan_events.json";

type Sink = Box<dyn Write + Send>;

lazy_static! {
    static ref LOG_SINK: Mutex<Option<Sink>> = Mutex::new(None);
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn open_append(path: &str) -> Option<fs::File> {
    if let Some(parent) = Path::new(path).parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

fn install(sink: Sink) {
    match LOG_SINK.lock() {
        Ok(mut guard) => *guard = Some(sink),
        Err(poisoned) => *poisoned.into_inner() = Some(sink),
    }
}

/// Open the system event log, falling back to /tmp when /var/log is not writable.
/// Returns false when neither location could be opened.
pub fn init_logging() -> bool {
    match open_append(DEFAULT_LOG_PATH).or_else(|| open_append(FALLBACK_LOG_PATH)) {
        Some(f) => {
            install(Box::new(f));
            true
        }
        None => false,
    }
}

/// Route events to an arbitrary writer (tests, stderr).
pub fn init_with_writer(writer: Box<dyn Write + Send>) {
    install(writer);
}

/// Drop the current sink. Later events are discarded.
pub fn shutdown() {
    match LOG_SINK.lock() {
        Ok(mut guard) => *guard = None,
        Err(poisoned) => *poisoned.into_inner() = None,
    }
}

pub fn is_enabled() -> bool {
    match LOG_SINK.lock() {
        Ok(guard) => guard.is_some(),
        Err(poisoned) => poisoned.into_inner().is_some(),
    }
}

pub fn log_event(event: &str, data: Value) {
    let mut guard = match LOG_SINK.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    let Some(sink) = guard.as_mut() else { return };

    let line = json!({
        "ts_ms": now_millis(),
        "event": event,
        "data": data,
    })
    .to_string();
    let _ = writeln!(sink, "{}", line);
    let _ = sink.flush();
}

/// Free-form text line, recorded as a `message` event.
pub fn write_line(text: &str) {
    log_event("message", json!({ "text": text }));
}

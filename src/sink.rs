use std::{
    borrow::Cow,
    fmt::Write as _,
    io::{self, IsTerminal, Write},
    sync::Mutex,
};

use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;

use crate::event::Record;
use crate::level::Level;

/// Destination for finished events.
///
/// A sink is shared by every request handled by every worker, so it has to
/// accept concurrent calls. One call to [`write`](Sink::write) carries one
/// complete event. Failures stay inside the sink and never reach the request.
pub trait Sink: Send + Sync {
    fn write(&self, record: &Record<'_>);
}

/// Rendering used by [`WriterSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One JSON object per line.
    Json,
    /// `<time> <LVL> <message> key=value ...`, optionally with ANSI colours.
    Console { color: bool },
}

/// Writes events to an [`io::Write`] behind a mutex.
///
/// Each event is rendered into its own buffer first and then written with a
/// single `write_all`, so lines from concurrent requests never interleave.
pub struct WriterSink {
    out: Mutex<Box<dyn Write + Send>>,
    format: Format,
}

impl WriterSink {
    pub fn new<W: Write + Send + 'static>(out: W, format: Format) -> Self {
        WriterSink {
            out: Mutex::new(Box::new(out)),
            format,
        }
    }

    /// Console output on stderr, coloured when stderr is a terminal.
    pub fn stderr() -> Self {
        let color = io::stderr().is_terminal();
        WriterSink::new(io::stderr(), Format::Console { color })
    }
}

impl Sink for WriterSink {
    fn write(&self, record: &Record<'_>) {
        let line = match self.format {
            Format::Json => match render_json(record) {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("failed to serialize request log event: {err}");
                    return;
                }
            },
            Format::Console { color } => render_console(record, color).into_bytes(),
        };

        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = out.write_all(&line).and_then(|_| out.flush()) {
            log::warn!("failed to write request log event: {err}");
        }
    }
}

fn format_time(record: &Record<'_>) -> String {
    record
        .time
        .format(&Rfc3339)
        .unwrap_or_else(|_| record.time.unix_timestamp().to_string())
}

fn render_json(record: &Record<'_>) -> Result<Vec<u8>, serde_json::Error> {
    let mut object = Map::new();
    for (key, value) in record.fields {
        object.insert(key.to_string(), value.clone());
    }
    object.insert("level".to_string(), record.level.as_str().into());
    object.insert("time".to_string(), format_time(record).into());
    object.insert("message".to_string(), record.message.into());

    let mut line = serde_json::to_vec(&Value::Object(object))?;
    line.push(b'\n');
    Ok(line)
}

const RESET: &str = "\x1b[0m";
const DARK_GRAY: &str = "\x1b[90m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";

fn level_color(record: &Record<'_>) -> &'static str {
    match record.level {
        Level::Trace => "\x1b[35m",
        Level::Debug => "\x1b[33m",
        Level::Info => "\x1b[32m",
        Level::Warn => "\x1b[31m",
        Level::Error | Level::Fatal | Level::Panic => "\x1b[1;31m",
        Level::Disabled => "",
    }
}

fn render_console(record: &Record<'_>, color: bool) -> String {
    let mut line = String::with_capacity(128);
    let time = format_time(record);

    if color {
        let _ = write!(
            line,
            "{DARK_GRAY}{time}{RESET} {}{}{RESET} {BOLD}{}{RESET}",
            level_color(record),
            record.level.code(),
            record.message
        );
    } else {
        let _ = write!(line, "{time} {} {}", record.level.code(), record.message);
    }

    for (key, value) in record.fields {
        let value = console_value(value);
        if color {
            let _ = write!(line, " {CYAN}{key}={RESET}{value}");
        } else {
            let _ = write!(line, " {key}={value}");
        }
    }
    line.push('\n');
    line
}

fn needs_quotes(c: char) -> bool {
    c.is_whitespace() || c.is_control() || c == '"' || c == '\\'
}

fn console_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) if s.is_empty() => Cow::Borrowed("\"\""),
        Value::String(s) if s.contains(needs_quotes) => Cow::Owned(value.to_string()),
        Value::String(s) => Cow::Borrowed(s),
        other => Cow::Owned(other.to_string()),
    }
}

/// Forwards events to the `log` facade (`log::logger()`).
///
/// Fields travel as structured key/values. `fatal` and `panic` events are
/// logged at `Error` with an extra `severity` field holding the original
/// level name.
///
/// ```rust,no_run
/// use actix_web::App;
/// use actix_web_middleware_reqlog::ReqLogger;
/// use structured_logger::{Builder, async_json::new_writer};
///
/// Builder::new()
///     .with_target_writer("*", new_writer(tokio::io::stdout()))
///     .init();
///
/// let app = App::new().wrap(ReqLogger::default().log_facade());
/// ```
#[derive(Debug, Clone)]
pub struct LogSink {
    target: Cow<'static, str>,
}

impl LogSink {
    pub fn new(target: impl Into<Cow<'static, str>>) -> Self {
        LogSink {
            target: target.into(),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::new("actix_web_middleware_reqlog")
    }
}

impl Sink for LogSink {
    fn write(&self, record: &Record<'_>) {
        let Some(level) = record.level.to_log() else {
            return;
        };

        let mut kvs: Vec<(&str, log::kv::Value)> = record
            .fields
            .iter()
            .map(|(k, v)| (k.as_ref(), to_kv(v)))
            .collect();
        if matches!(record.level, Level::Fatal | Level::Panic) {
            kvs.push(("severity", log::kv::Value::from(record.level.as_str())));
        }
        let kvs = kvs.as_slice();

        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", record.message))
                .level(level)
                .target(self.target.as_ref())
                .module_path_static(Some(module_path!()))
                .key_values(&kvs)
                .build(),
        );
    }
}

fn to_kv(value: &Value) -> log::kv::Value<'_> {
    match value {
        Value::Null => log::kv::Value::null(),
        Value::Bool(b) => log::kv::Value::from(*b),
        Value::String(s) => log::kv::Value::from(s.as_str()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                log::kv::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                log::kv::Value::from(u)
            } else {
                log::kv::Value::from(n.as_f64().unwrap_or_default())
            }
        }
        other => log::kv::Value::from_display(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Field;
    use std::sync::Arc;
    use time::OffsetDateTime;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn fields() -> Vec<Field> {
        vec![
            ("status".into(), 404.into()),
            ("method".into(), "GET".into()),
            ("path".into(), "/example?a=100".into()),
            ("user_agent".into(), "curl/8.0 (x86_64)".into()),
            ("ip".into(), "".into()),
        ]
    }

    #[test]
    fn test_console_render() {
        let fields = fields();
        let record = Record {
            time: OffsetDateTime::UNIX_EPOCH,
            level: Level::Warn,
            message: "Request",
            fields: &fields,
        };

        let line = render_console(&record, false);
        assert_eq!(
            line,
            "1970-01-01T00:00:00Z WRN Request status=404 method=GET path=/example?a=100 \
             user_agent=\"curl/8.0 (x86_64)\" ip=\"\"\n"
        );

        let colored = render_console(&record, true);
        assert!(colored.contains("WRN"));
        assert!(colored.contains("\x1b[36mpath=\x1b[0m/example?a=100"));
    }

    #[test]
    fn test_json_render_keeps_reserved_keys() {
        let mut fields = fields();
        fields.push(("message".into(), "shadow".into()));
        let record = Record {
            time: OffsetDateTime::UNIX_EPOCH,
            level: Level::Fatal,
            message: "Request",
            fields: &fields,
        };

        let line = render_json(&record).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["level"], "fatal");
        assert_eq!(value["message"], "Request");
        assert_eq!(value["status"], 404);
        assert_eq!(value["time"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_writer_sink_writes_whole_lines() {
        let buf = SharedBuf::default();
        let sink = Arc::new(WriterSink::new(buf.clone(), Format::Json));
        let fields = fields();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                let fields = fields.clone();
                std::thread::spawn(move || {
                    let message = format!("event {i}");
                    sink.write(&Record {
                        time: OffsetDateTime::now_utc(),
                        level: Level::Info,
                        message: &message,
                        fields: &fields,
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = buf.contents();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 8);
        for line in lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["method"], "GET");
        }
    }

    #[test]
    fn test_console_value_quoting() {
        assert_eq!(console_value(&"/a?b=1&c=2".into()), "/a?b=1&c=2");
        assert_eq!(console_value(&"".into()), "\"\"");
        assert_eq!(console_value(&"two words".into()), "\"two words\"");
        assert_eq!(console_value(&"say \"hi\"".into()), "\"say \\\"hi\\\"\"");
        assert_eq!(console_value(&"C:\\tmp".into()), "\"C:\\\\tmp\"");
        assert_eq!(console_value(&12.5.into()), "12.5");
        assert_eq!(console_value(&true.into()), "true");
    }

    /// Keeps records logged to the test target.
    struct Captured(Mutex<Vec<(log::Level, String, String, Vec<(String, String)>)>>);

    struct KvCollector(Vec<(String, String)>);

    impl<'kvs> log::kv::VisitSource<'kvs> for KvCollector {
        fn visit_pair(
            &mut self,
            key: log::kv::Key<'kvs>,
            value: log::kv::Value<'kvs>,
        ) -> Result<(), log::kv::Error> {
            self.0.push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    impl log::Log for Captured {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.target() == "reqlog_sink_test"
        }

        fn log(&self, record: &log::Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let mut kvs = KvCollector(Vec::new());
            record.key_values().visit(&mut kvs).unwrap();
            self.0.lock().unwrap().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
                kvs.0,
            ));
        }

        fn flush(&self) {}
    }

    static CAPTURED: Captured = Captured(Mutex::new(Vec::new()));

    #[test]
    fn test_log_sink_forwards_to_facade() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            log::set_logger(&CAPTURED).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
        });

        let sink = LogSink::new("reqlog_sink_test");
        let fields = fields();
        for level in [Level::Warn, Level::Fatal, Level::Disabled] {
            sink.write(&Record {
                time: OffsetDateTime::UNIX_EPOCH,
                level,
                message: "Request",
                fields: &fields,
            });
        }

        let records = CAPTURED.0.lock().unwrap();
        // disabled events never reach the facade
        assert_eq!(records.len(), 2);

        let (level, target, message, kvs) = &records[0];
        assert_eq!(*level, log::Level::Warn);
        assert_eq!(target, "reqlog_sink_test");
        assert_eq!(message, "Request");
        assert!(kvs.contains(&("status".to_string(), "404".to_string())));
        assert!(kvs.contains(&("path".to_string(), "/example?a=100".to_string())));
        assert!(!kvs.iter().any(|(k, _)| k == "severity"));

        let (level, _, _, kvs) = &records[1];
        assert_eq!(*level, log::Level::Error);
        assert!(kvs.contains(&("severity".to_string(), "fatal".to_string())));
    }
}

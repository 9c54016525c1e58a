//! `tracing` layer that forwards events to the host syslog facility.

use std::ffi::CString;
use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Forwards every enabled event to `syslog(3)` under `LOG_DAEMON`.
#[derive(Debug)]
pub struct SyslogLayer {
    _opened: (),
}

impl SyslogLayer {
    /// Open the system log connection for this process.
    pub fn open() -> Self {
        // SAFETY: a null ident makes libc use the program name; the options
        // and facility are plain integer flags.
        #[allow(unsafe_code)]
        unsafe {
            libc::openlog(
                std::ptr::null(),
                libc::LOG_PID | libc::LOG_NDELAY,
                libc::LOG_DAEMON,
            );
        }
        Self { _opened: () }
    }
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        let Ok(text) = CString::new(line.finish().replace('\0', " ")) else {
            return;
        };
        // SAFETY: the format string is a static "%s" and `text` is a valid
        // NUL-terminated string that outlives the call.
        #[allow(unsafe_code)]
        unsafe {
            libc::syslog(priority(*event.metadata().level()), c"%s".as_ptr(), text.as_ptr());
        }
    }
}

const fn priority(level: Level) -> libc::c_int {
    match level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// Flattens an event into `message key=value ...`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}

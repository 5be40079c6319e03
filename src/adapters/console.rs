//! Logging adapter.

use super::{
    Adapter, CaptureOptions, Handler, HandlerId, Handlers, Installation, Liveness, render_arg,
};
use crate::Result;
use crate::models::{LogLevel, StackFrame};
use crate::platform::{Console, Platform};
use std::sync::Arc;

const ADAPTER: &str = "console";

/// One intercepted logging call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleCall {
    /// Call severity.
    pub level: LogLevel,
    /// Rendered arguments.
    pub args: Vec<String>,
    /// Call-site stack for warn and error calls, when enabled.
    pub stack: Option<Vec<StackFrame>>,
    /// Capture time (Unix epoch milliseconds).
    pub timestamp: u64,
}

#[derive(Debug)]
struct ConsoleShared {
    options: CaptureOptions,
    handlers: Handlers<ConsoleCall>,
}

impl ConsoleShared {
    fn capture(&self, level: LogLevel, args: &[serde_json::Value]) {
        let call = ConsoleCall {
            level,
            args: args
                .iter()
                .map(|arg| render_arg(arg, self.options.max_body_size))
                .collect(),
            stack: if level.wants_stack() {
                self.options.stack()
            } else {
                None
            },
            timestamp: crate::current_timestamp_ms(),
        };
        self.handlers.emit(ADAPTER, &call);
    }
}

struct ConsoleWrapper {
    original: Arc<dyn Console>,
    shared: Arc<ConsoleShared>,
    live: Liveness,
}

impl Console for ConsoleWrapper {
    fn write(&self, level: LogLevel, args: &[serde_json::Value]) {
        self.original.write(level, args);
        self.live.capture(ADAPTER, || self.shared.capture(level, args));
    }
}

/// Wraps the platform's console; the original still receives every call.
#[derive(Debug)]
pub struct ConsoleAdapter {
    platform: Arc<Platform>,
    shared: Arc<ConsoleShared>,
    installation: Installation<dyn Console>,
}

impl ConsoleAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(platform: Arc<Platform>, options: CaptureOptions) -> Self {
        Self {
            platform,
            shared: Arc::new(ConsoleShared {
                options,
                handlers: Handlers::default(),
            }),
            installation: Installation::new(ADAPTER),
        }
    }

    /// Registers a handler for captured calls.
    pub fn subscribe(&self, handler: Handler<ConsoleCall>) -> HandlerId {
        self.shared.handlers.add(handler)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.shared.handlers.remove(id)
    }
}

impl Adapter for ConsoleAdapter {
    fn name(&self) -> &'static str {
        ADAPTER
    }

    fn install(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.installation.install(
            &self.platform.console,
            |original: Arc<dyn Console>, live| -> Arc<dyn Console> {
                Arc::new(ConsoleWrapper {
                    original,
                    shared,
                    live,
                })
            },
        )
    }

    fn uninstall(&self) {
        self.installation.uninstall(&self.platform.console);
    }

    fn is_installed(&self) -> bool {
        self.installation.is_installed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        lines: Mutex<Vec<(LogLevel, usize)>>,
    }

    impl Console for Recording {
        fn write(&self, level: LogLevel, args: &[serde_json::Value]) {
            self.lines.lock().unwrap().push((level, args.len()));
        }
    }

    fn setup(options: CaptureOptions) -> (Arc<Platform>, Arc<Recording>, ConsoleAdapter, Arc<Mutex<Vec<ConsoleCall>>>) {
        let platform = Arc::new(Platform::default());
        let host = Arc::new(Recording::default());
        platform.console.replace(Arc::clone(&host) as Arc<dyn Console>);
        let adapter = ConsoleAdapter::new(Arc::clone(&platform), options);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        adapter.subscribe(Arc::new(move |call: &ConsoleCall| {
            sink.lock().unwrap().push(call.clone());
        }));
        adapter.install().unwrap();
        (platform, host, adapter, calls)
    }

    #[test]
    fn test_original_console_still_receives_calls() {
        let (platform, host, _adapter, calls) = setup(CaptureOptions::default());
        platform.log(LogLevel::Info, &[json!("loaded"), json!({"items": 3})]);

        assert_eq!(host.lines.lock().unwrap().as_slice(), &[(LogLevel::Info, 2)]);
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].args, vec!["loaded", r#"{"items":3}"#]);
        assert!(calls[0].stack.is_none());
    }

    #[test]
    fn test_stack_only_for_warn_and_error() {
        let (platform, _host, _adapter, calls) = setup(CaptureOptions::default());
        platform.log(LogLevel::Debug, &[json!("quiet")]);
        platform.log(LogLevel::Error, &[json!("loud")]);

        let calls = calls.lock().unwrap();
        assert!(calls[0].stack.is_none());
        assert!(calls[1].stack.is_some());
    }

    #[test]
    fn test_stack_capture_can_be_disabled() {
        let options = CaptureOptions {
            capture_stack_traces: false,
            ..CaptureOptions::default()
        };
        let (platform, _host, _adapter, calls) = setup(options);
        platform.log(LogLevel::Error, &[json!("loud")]);
        assert!(calls.lock().unwrap()[0].stack.is_none());
    }

    #[test]
    fn test_logging_from_a_handler_is_not_recaptured() {
        let (platform, host, adapter, calls) = setup(CaptureOptions::default());
        let echo_platform = Arc::clone(&platform);
        adapter.subscribe(Arc::new(move |call: &ConsoleCall| {
            echo_platform.log(LogLevel::Debug, &[json!(format!("saw {}", call.level))]);
        }));

        platform.log(LogLevel::Info, &[json!("once")]);
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(host.lines.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_uninstall_restores_console() {
        let (platform, host, adapter, calls) = setup(CaptureOptions::default());
        adapter.uninstall();
        platform.log(LogLevel::Warn, &[json!("after")]);
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(host.lines.lock().unwrap().len(), 1);
    }
}

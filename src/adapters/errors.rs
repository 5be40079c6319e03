//! Panic and rejection adapters.
//!
//! The panic adapter chains onto the process panic hook. A hook must not
//! panic, and it runs while the failing thread unwinds, so the hook only
//! builds a report and hands it to a relay thread; handlers run there.
//! Panics raised on the relay thread itself are not reported, which keeps
//! a failing handler from feeding itself.
//!
//! Several adapters can chain onto the hook at once. Uninstalling one that
//! another has chained on top of only deactivates it; the hook is restored
//! once every adapter above it is gone as well.

use super::{
    Adapter, CaptureOptions, Handler, HandlerId, Handlers, Installation, Liveness, capture_stack,
};
use crate::bus::panic_message;
use crate::models::{ErrorSource, StackFrame};
use crate::platform::{Platform, Rejection, RejectionSink};
use crate::{Error, Result};
use std::cell::Cell;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// An intercepted failure, before fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    /// Interception point.
    pub source: ErrorSource,
    /// Failure message.
    pub message: String,
    /// Stack at the failure, innermost first; empty when not captured.
    pub stack: Vec<StackFrame>,
    /// `file:line` of the failure site.
    pub location: Option<String>,
    /// Failing thread or task name.
    pub thread: Option<String>,
    /// Capture time (Unix epoch milliseconds).
    pub timestamp: u64,
}

impl CapturedError {
    fn from_panic(info: &PanicHookInfo<'_>, options: CaptureOptions) -> Self {
        Self {
            source: ErrorSource::Panic,
            message: panic_message(info.payload()),
            stack: if options.capture_stack_traces {
                capture_stack()
            } else {
                Vec::new()
            },
            location: info
                .location()
                .map(|location| format!("{}:{}", location.file(), location.line())),
            thread: std::thread::current().name().map(str::to_string),
            timestamp: crate::current_timestamp_ms(),
        }
    }

    fn from_rejection(rejection: &Rejection, options: CaptureOptions) -> Self {
        Self {
            source: ErrorSource::Rejection,
            message: rejection.message.clone(),
            stack: options.stack().unwrap_or_default(),
            location: rejection.location.clone(),
            thread: rejection.task.clone(),
            timestamp: crate::current_timestamp_ms(),
        }
    }
}

type PanicHook = dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static;

thread_local! {
    static ON_RELAY: Cell<bool> = const { Cell::new(false) };
}

/// One adapter's link in the process panic hook chain.
struct HookLink {
    generation: u64,
    original: Arc<PanicHook>,
    active: Arc<AtomicBool>,
}

/// Hooks chained by panic adapters, oldest first.
static HOOK_CHAIN: Mutex<Vec<HookLink>> = Mutex::new(Vec::new());
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(0);

struct HookState {
    generation: u64,
    active: Arc<AtomicBool>,
}

#[derive(Debug)]
struct PanicShared {
    options: CaptureOptions,
    handlers: Handlers<CapturedError>,
}

/// Chains onto the process panic hook.
///
/// The previous hook keeps running for every panic, after the report is
/// queued.
pub struct PanicAdapter {
    shared: Arc<PanicShared>,
    state: Mutex<Option<HookState>>,
}

impl PanicAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            shared: Arc::new(PanicShared {
                options,
                handlers: Handlers::default(),
            }),
            state: Mutex::new(None),
        }
    }

    /// Registers a handler; it runs on the relay thread.
    pub fn subscribe(&self, handler: Handler<CapturedError>) -> HandlerId {
        self.shared.handlers.add(handler)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.shared.handlers.remove(id)
    }

    fn install_error(reason: impl Into<String>) -> Error {
        metrics::counter!("lookout_adapter_install_failures_total", "adapter" => "panic")
            .increment(1);
        Error::AdapterInstall {
            adapter: "panic",
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for PanicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanicAdapter")
            .field("handlers", &self.shared.handlers)
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl Adapter for PanicAdapter {
    fn name(&self) -> &'static str {
        "panic"
    }

    fn install(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_some() {
            return Ok(());
        }
        if std::thread::panicking() {
            return Err(Self::install_error(
                "the panic hook cannot be replaced while panicking",
            ));
        }

        let (sender, receiver) = mpsc::channel::<CapturedError>();
        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("lookout-panic-relay".to_string())
            .spawn(move || {
                ON_RELAY.with(|flag| flag.set(true));
                for report in receiver {
                    shared.handlers.emit("panic", &report);
                }
                debug!("Panic relay stopped");
            })
            .map_err(|e| Self::install_error(format!("failed to start relay thread: {e}")))?;

        let mut chain = HOOK_CHAIN.lock().unwrap_or_else(PoisonError::into_inner);
        let original: Arc<PanicHook> = Arc::from(std::panic::take_hook());
        let active = Arc::new(AtomicBool::new(true));
        let chained = Arc::clone(&original);
        let hook_active = Arc::clone(&active);
        let options = self.shared.options;
        std::panic::set_hook(Box::new(move |info| {
            if hook_active.load(Ordering::SeqCst) && !ON_RELAY.with(Cell::get) {
                let _ = sender.send(CapturedError::from_panic(info, options));
            }
            chained(info);
        }));

        let generation = NEXT_GENERATION.fetch_add(1, Ordering::SeqCst);
        chain.push(HookLink {
            generation,
            original,
            active: Arc::clone(&active),
        });
        *state = Some(HookState { generation, active });
        debug!(adapter = "panic", "Adapter installed");
        Ok(())
    }

    fn uninstall(&self) {
        let Some(hook) = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        hook.active.store(false, Ordering::SeqCst);
        if std::thread::panicking() {
            warn!(adapter = "panic", "Uninstalled while panicking; hook left in place, inactive");
            return;
        }
        let mut chain = HOOK_CHAIN.lock().unwrap_or_else(PoisonError::into_inner);
        if chain
            .last()
            .is_none_or(|link| link.generation != hook.generation)
        {
            debug!(adapter = "panic", "Another hook is chained on ours; left in place, inactive");
            return;
        }
        let mut restored = None;
        while chain
            .last()
            .is_some_and(|link| !link.active.load(Ordering::SeqCst))
        {
            restored = chain.pop().map(|link| link.original);
        }
        if let Some(original) = restored {
            // Dropping our hooks drops the relays' senders, which ends the relays.
            std::panic::set_hook(Box::new(move |info| original(info)));
        }
        debug!(adapter = "panic", "Adapter uninstalled");
    }

    fn is_installed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for PanicAdapter {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[derive(Debug)]
struct RejectionShared {
    options: CaptureOptions,
    handlers: Handlers<CapturedError>,
}

struct RejectionWrapper {
    original: Arc<dyn RejectionSink>,
    shared: Arc<RejectionShared>,
    live: Liveness,
}

impl RejectionSink for RejectionWrapper {
    fn report(&self, rejection: &Rejection) {
        self.live.capture("rejection", || {
            let captured = CapturedError::from_rejection(rejection, self.shared.options);
            self.shared.handlers.emit("rejection", &captured);
        });
        self.original.report(rejection);
    }
}

/// Wraps the platform's unhandled-failure sink.
#[derive(Debug)]
pub struct RejectionAdapter {
    platform: Arc<Platform>,
    shared: Arc<RejectionShared>,
    installation: Installation<dyn RejectionSink>,
}

impl RejectionAdapter {
    /// Creates an uninstalled adapter.
    #[must_use]
    pub fn new(platform: Arc<Platform>, options: CaptureOptions) -> Self {
        Self {
            platform,
            shared: Arc::new(RejectionShared {
                options,
                handlers: Handlers::default(),
            }),
            installation: Installation::new("rejection"),
        }
    }

    /// Registers a handler.
    pub fn subscribe(&self, handler: Handler<CapturedError>) -> HandlerId {
        self.shared.handlers.add(handler)
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        self.shared.handlers.remove(id)
    }
}

impl Adapter for RejectionAdapter {
    fn name(&self) -> &'static str {
        "rejection"
    }

    fn install(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.installation.install(
            &self.platform.rejections,
            |original: Arc<dyn RejectionSink>, live| -> Arc<dyn RejectionSink> {
                Arc::new(RejectionWrapper {
                    original,
                    shared,
                    live,
                })
            },
        )
    }

    fn uninstall(&self) {
        self.installation.uninstall(&self.platform.rejections);
    }

    fn is_installed(&self) -> bool {
        self.installation.is_installed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::{Duration, Instant};

    fn wait_for(reports: &Mutex<Vec<CapturedError>>, needle: &str) -> Option<CapturedError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(found) = reports
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.message.contains(needle))
            {
                return Some(found.clone());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    fn recording(adapter: &PanicAdapter) -> Arc<Mutex<Vec<CapturedError>>> {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        adapter.subscribe(Arc::new(move |report: &CapturedError| {
            sink.lock().unwrap().push(report.clone());
        }));
        reports
    }

    #[test]
    #[serial(panic_hook)]
    fn test_panic_is_reported_off_thread() {
        let adapter = PanicAdapter::new(CaptureOptions::default());
        let reports = recording(&adapter);
        adapter.install().unwrap();

        let worker = std::thread::Builder::new()
            .name("doomed-worker".into())
            .spawn(|| panic!("kaboom 42"))
            .unwrap();
        assert!(worker.join().is_err());

        let report = wait_for(&reports, "kaboom 42").expect("panic reported");
        assert_eq!(report.source, ErrorSource::Panic);
        assert_eq!(report.thread.as_deref(), Some("doomed-worker"));
        assert!(report.location.as_deref().is_some_and(|l| l.contains("errors.rs")));

        adapter.uninstall();
        assert!(!adapter.is_installed());
    }

    #[test]
    #[serial(panic_hook)]
    fn test_uninstalled_adapter_stops_reporting() {
        let adapter = PanicAdapter::new(CaptureOptions {
            capture_stack_traces: false,
            ..CaptureOptions::default()
        });
        let reports = recording(&adapter);
        adapter.install().unwrap();
        adapter.uninstall();

        let _ = std::thread::spawn(|| panic!("after uninstall")).join();
        std::thread::sleep(Duration::from_millis(50));
        assert!(
            reports
                .lock()
                .unwrap()
                .iter()
                .all(|r| !r.message.contains("after uninstall"))
        );
    }

    #[test]
    #[serial(panic_hook)]
    fn test_uninstall_under_a_later_adapter_keeps_it_reporting() {
        let first = PanicAdapter::new(CaptureOptions::default());
        let second = PanicAdapter::new(CaptureOptions::default());
        let first_reports = recording(&first);
        let second_reports = recording(&second);
        first.install().unwrap();
        second.install().unwrap();

        first.uninstall();
        let _ = std::thread::spawn(|| panic!("boom after first left")).join();

        assert!(second.is_installed());
        assert!(wait_for(&second_reports, "boom after first left").is_some());
        assert!(
            first_reports
                .lock()
                .unwrap()
                .iter()
                .all(|r| !r.message.contains("boom after first left"))
        );

        second.uninstall();
        let _ = std::thread::spawn(|| panic!("boom after both left")).join();
        std::thread::sleep(Duration::from_millis(50));
        assert!(
            second_reports
                .lock()
                .unwrap()
                .iter()
                .all(|r| !r.message.contains("boom after both left"))
        );
    }

    #[test]
    #[serial(panic_hook)]
    fn test_panicking_handler_does_not_loop() {
        let adapter = PanicAdapter::new(CaptureOptions::default());
        adapter.subscribe(Arc::new(|_| panic!("handler blew up")));
        let reports = recording(&adapter);
        adapter.install().unwrap();

        let _ = std::thread::spawn(|| panic!("first failure")).join();
        assert!(wait_for(&reports, "first failure").is_some());
        std::thread::sleep(Duration::from_millis(50));
        assert!(
            reports
                .lock()
                .unwrap()
                .iter()
                .all(|r| !r.message.contains("handler blew up"))
        );
        adapter.uninstall();
    }

    #[test]
    fn test_rejection_is_captured_and_forwarded() {
        #[derive(Default)]
        struct Sink(Mutex<Vec<String>>);
        impl RejectionSink for Sink {
            fn report(&self, rejection: &Rejection) {
                self.0.lock().unwrap().push(rejection.message.clone());
            }
        }

        let platform = Arc::new(Platform::default());
        let host = Arc::new(Sink::default());
        platform
            .rejections
            .replace(Arc::clone(&host) as Arc<dyn RejectionSink>);
        let adapter = RejectionAdapter::new(Arc::clone(&platform), CaptureOptions::default());
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        adapter.subscribe(Arc::new(move |report: &CapturedError| {
            sink.lock().unwrap().push(report.clone());
        }));
        adapter.install().unwrap();

        platform.report_rejection(&Rejection::new("task exploded").with_task("sync"));

        assert_eq!(host.0.lock().unwrap().as_slice(), &["task exploded".to_string()]);
        let captured = captured.lock().unwrap();
        assert_eq!(captured[0].source, ErrorSource::Rejection);
        assert_eq!(captured[0].thread.as_deref(), Some("sync"));
    }
}

//! Non-fatal conditions found while parsing.
//!
//! Diagnostics never abort a parse and never appear in the returned result.
//! They go to a caller-supplied callback, or to the `log` facade when no
//! callback is installed.

use std::fmt;

/// A recoverable problem found in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A disk hardware item references a disk that was never declared.
    UnresolvedDiskAssociation {
        /// The item's `HostResource` value.
        host_resource: String,
    },
    /// A declared disk never received a position and was dropped.
    OrphanDisk {
        /// The dropped disk's id.
        disk_id: String,
    },
    /// The archive holds more than one descriptor; the later one wins.
    DuplicateDescriptor {
        /// Name of the replacing descriptor entry.
        entry_name: String,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnresolvedDiskAssociation { host_resource } => {
                write!(f, "No disk found: '{}'", host_resource)
            }
            Diagnostic::OrphanDisk { disk_id } => {
                write!(f, "No position specified for '{}'", disk_id)
            }
            Diagnostic::DuplicateDescriptor { entry_name } => {
                write!(f, "Descriptor '{}' replaces an earlier descriptor", entry_name)
            }
        }
    }
}

/// Type alias for the diagnostic callback function.
pub type DiagnosticCallback = Box<dyn Fn(Diagnostic) + Send>;

/// Routes diagnostics to a callback or, failing that, to the logger.
#[derive(Default)]
pub struct DiagnosticSink {
    callback: Option<DiagnosticCallback>,
}

impl DiagnosticSink {
    /// Creates a sink around an optional callback.
    pub fn new(callback: Option<DiagnosticCallback>) -> Self {
        Self { callback }
    }

    /// Reports one diagnostic.
    pub fn emit(&self, diagnostic: Diagnostic) {
        match self.callback {
            Some(ref callback) => callback(diagnostic),
            None => log::warn!("{}", diagnostic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_display() {
        let d = Diagnostic::OrphanDisk {
            disk_id: "vmdisk2".to_string(),
        };
        assert_eq!(d.to_string(), "No position specified for 'vmdisk2'");

        let d = Diagnostic::UnresolvedDiskAssociation {
            host_resource: "ovf:/disk/missing".to_string(),
        };
        assert!(d.to_string().contains("ovf:/disk/missing"));
    }

    #[test]
    fn test_sink_forwards_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink = DiagnosticSink::new(Some(Box::new(move |d| {
            captured.lock().unwrap().push(d);
        })));

        sink.emit(Diagnostic::DuplicateDescriptor {
            entry_name: "b.ovf".to_string(),
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Diagnostic::DuplicateDescriptor {
                entry_name: "b.ovf".to_string()
            }]
        );
    }

    /// Records every log message emitted by the test binary.
    struct CaptureLogger;

    static CAPTURED: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());
    static LOGGER: CaptureLogger = CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &log::Record<'_>) {
            CAPTURED
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_sink_without_callback_logs_warning() {
        // The logger can only be installed once per process
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        DiagnosticSink::default().emit(Diagnostic::OrphanDisk {
            disk_id: "d1".to_string(),
        });

        let captured = CAPTURED.lock().unwrap();
        assert!(captured.contains(&(
            log::Level::Warn,
            "No position specified for 'd1'".to_string()
        )));
    }
}

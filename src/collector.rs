// Live-connection collector — a pull-based stats registry.
//
// Holds a set of live connections keyed by socket handle and, on each pull,
// acquires a fresh kernel record per member and emits one sample per
// (metric, member). A member whose acquisition fails is reported through
// the error callback and evicted, so the registry heals itself when hosts
// forget to remove closed connections. A pull never fails as a whole.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::conn::StreamConn;
use crate::error::TcpInfoError;
use crate::sys::{self, MetricKind, SocketHandle};

/// Callback invoked once per member whose stats acquisition failed.
pub type ErrorFn = Box<dyn Fn(&TcpInfoError) + Send + Sync>;

/// One metric descriptor, stable for the life of the collector.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub name: String,
    pub kind: MetricKind,
    pub help: &'static str,
    /// Constant label names followed by the per-connection label names.
    pub label_names: Vec<String>,
}

/// One numeric sample emitted during a pull.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Constant labels followed by the member's label values.
    pub labels: Vec<(String, String)>,
}

/// Thread-safe registry of live connections exposed as pull-based metrics.
pub struct TcpInfoCollector {
    prefix: String,
    conn_label_names: Vec<String>,
    const_labels: Vec<(String, String)>,
    conns: Mutex<HashMap<SocketHandle, Vec<String>>>,
    on_error: ErrorFn,
}

impl TcpInfoCollector {
    /// Create a collector.
    ///
    /// `conn_label_names` are the per-connection label names whose values
    /// are supplied at registration; `const_labels` apply to every sample
    /// from this collector. `prefix` is prepended to every metric name when
    /// non-empty.
    pub fn new(
        prefix: &str,
        conn_label_names: Vec<String>,
        const_labels: Vec<(String, String)>,
        on_error: ErrorFn,
    ) -> Self {
        Self {
            prefix: prefix.to_string(),
            conn_label_names,
            const_labels,
            conns: Mutex::new(HashMap::new()),
            on_error,
        }
    }

    fn qualified(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketHandle, Vec<String>>> {
        self.conns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connection with its label values, replacing any prior
    /// entry for the same socket identity. Returns false (and registers
    /// nothing) for connections without a socket handle.
    pub fn add<C: StreamConn>(&self, conn: &C, label_values: Vec<String>) -> bool {
        let Some(handle) = conn.socket() else {
            log::warn!("not registering a connection without a socket handle");
            return false;
        };
        self.lock().insert(handle, label_values);
        true
    }

    /// Remove a connection if present; absent entries are not an error.
    pub fn remove<C: StreamConn>(&self, conn: &C) {
        if let Some(handle) = conn.socket() {
            self.lock().remove(&handle);
        }
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One descriptor per metric in the platform schema. The list is
    /// derived from the normalized record and does not change at runtime.
    pub fn describe(&self) -> Vec<Descriptor> {
        let mut label_names: Vec<String> =
            self.const_labels.iter().map(|(k, _)| k.clone()).collect();
        label_names.extend(self.conn_label_names.iter().cloned());

        sys::metrics()
            .iter()
            .map(|m| Descriptor {
                name: self.qualified(m.name),
                kind: m.kind,
                help: m.help,
                label_names: label_names.clone(),
            })
            .collect()
    }

    /// Acquire fresh stats for every member and emit samples.
    ///
    /// Per-member failure is not fatal: the error callback fires, the
    /// member is evicted, and the pull continues with the rest.
    pub fn collect(&self) -> Vec<Sample> {
        let mut conns = self.lock();
        let mut samples = Vec::new();
        let mut evict = Vec::new();

        for (&handle, label_values) in conns.iter() {
            let sys_info = match sys::get_tcp_info(handle) {
                Ok(info) => info,
                Err(err) => {
                    log::warn!("evicting connection with unreadable TCP info: {err}");
                    (self.on_error)(&err);
                    evict.push(handle);
                    continue;
                }
            };

            let mut labels: Vec<(String, String)> = self.const_labels.clone();
            labels.extend(
                self.conn_label_names
                    .iter()
                    .cloned()
                    .zip(label_values.iter().cloned()),
            );

            for m in sys::metrics() {
                if let Some(value) = (m.read)(&sys_info) {
                    samples.push(Sample {
                        name: self.qualified(m.name),
                        kind: m.kind,
                        value,
                        labels: labels.clone(),
                    });
                }
            }
        }

        for handle in evict {
            conns.remove(&handle);
        }

        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> TcpInfoCollector {
        TcpInfoCollector::new(
            "app",
            vec!["peer".to_string()],
            vec![("host".to_string(), "m1".to_string())],
            Box::new(|_| {}),
        )
    }

    // ut_describe_schema: one descriptor per platform metric, names
    // qualified, labels = const + per-connection
    #[test]
    fn ut_describe_schema() {
        let c = collector();
        let descs = c.describe();
        assert_eq!(descs.len(), sys::metrics().len());
        for d in &descs {
            assert!(d.name.starts_with("app_tcpinfo_"));
            assert_eq!(d.label_names, vec!["host".to_string(), "peer".to_string()]);
        }
    }

    // ut_describe_stable: two calls produce the same descriptor list
    #[test]
    fn ut_describe_stable() {
        let c = collector();
        let a: Vec<String> = c.describe().into_iter().map(|d| d.name).collect();
        let b: Vec<String> = c.describe().into_iter().map(|d| d.name).collect();
        assert_eq!(a, b);
    }

    // ut_unqualified_prefix: empty prefix leaves the platform name as-is
    #[test]
    fn ut_unqualified_prefix() {
        let c = TcpInfoCollector::new("", Vec::new(), Vec::new(), Box::new(|_| {}));
        assert!(c
            .describe()
            .iter()
            .all(|d| d.name.starts_with("tcpinfo_")));
    }
}

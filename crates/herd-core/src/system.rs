use std::path::Path;

/// Get platform (OS family).
#[inline]
pub fn platform() -> &'static str {
    std::env::consts::OS
}

/// Get architecture.
#[inline]
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// Identity of this monitor process, used in logs.
///
/// Inside Kubernetes this is the pod name (the hostname); elsewhere the hostname plus the process id.
pub fn monitor_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(str::to_string))
        .filter(|h| !h.is_empty());

    match host {
        Some(name) if is_kubernetes() => name,
        Some(name) => format!("{name}-{}", std::process::id()),
        None => format!("herd-monitor-{}", std::process::id()),
    }
}

fn is_kubernetes() -> bool {
    std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
        || Path::new("/var/run/secrets/kubernetes.io/serviceaccount").exists()
}

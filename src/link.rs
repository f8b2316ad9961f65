//! Connection supervision: periodic link checks with graduated escalation.
//!
//! The supervisor is a pure policy machine over a `LinkControl`
//! implementation, so the withhold-during-session and soft-before-hard
//! rules are testable with a mock. The real control shells out to nmcli
//! and keeps an avahi announcement child alive.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// Operations the supervisor drives. Implementations decide what
/// "connected", "reconnect" and "reset" mean for the platform.
pub trait LinkControl {
    fn is_connected(&mut self) -> bool;

    /// Ensure the name-discovery announcement is up. Called on every
    /// connected check; implementations must make this idempotent and
    /// respawn a lapsed announcement.
    fn announce(&mut self) -> Result<()>;

    /// Cheap recovery: ask the link to reassociate.
    fn reconnect(&mut self) -> Result<()>;

    /// Expensive recovery: radio power-cycle equivalent.
    fn hard_reset(&mut self) -> Result<()>;
}

/// Supervisor policy knobs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub check_interval: Duration,
    /// Failed checks before escalating from soft reconnect to hard reset
    pub retry_ceiling: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
            retry_ceiling: 5,
        }
    }
}

/// WiFi link state machine with bounded retry and full-reset escalation.
pub struct LinkSupervisor<L: LinkControl> {
    cfg: SupervisorConfig,
    link: L,
    connected: bool,
    failures: u32,
    last_check: Option<Instant>,
}

impl<L: LinkControl> LinkSupervisor<L> {
    pub fn new(link: L, cfg: SupervisorConfig) -> Self {
        Self {
            cfg,
            link,
            connected: false,
            failures: 0,
            last_check: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Periodic supervision step. Cheap to call every loop iteration; only
    /// does work once per check interval.
    ///
    /// `session_active`: a streaming or recording session is live, so a
    /// disruptive radio reset must be withheld.
    pub fn tick(&mut self, now: Instant, session_active: bool) {
        if let Some(last) = self.last_check {
            if now.duration_since(last) < self.cfg.check_interval {
                return;
            }
        }
        self.last_check = Some(now);

        if self.link.is_connected() {
            if !self.connected {
                info!("link up");
            }
            self.connected = true;
            self.failures = 0;
            if let Err(e) = self.link.announce() {
                warn!(error = %e, "discovery announcement failed");
            }
            return;
        }

        self.connected = false;

        if session_active {
            // Protect the in-progress operation from a radio reset
            debug!("link down, session active; withholding reconnect");
            return;
        }

        self.failures += 1;
        if self.failures >= self.cfg.retry_ceiling {
            warn!(failures = self.failures, "retry ceiling hit, hard resetting link");
            if let Err(e) = self.link.hard_reset() {
                warn!(error = %e, "hard reset failed");
            }
            self.failures = 0;
        } else {
            info!(attempt = self.failures, "link down, soft reconnect");
            if let Err(e) = self.link.reconnect() {
                warn!(error = %e, "soft reconnect failed");
            }
        }
    }
}

/// Real link control: default-route probing, nmcli recovery, avahi
/// announcement.
pub struct NetLink {
    wifi_interface: String,
    service_name: String,
    http_port: u16,
    announcer: Option<Child>,
}

impl NetLink {
    pub fn new(wifi_interface: String, service_name: String, http_port: u16) -> Self {
        Self {
            wifi_interface,
            service_name,
            http_port,
            announcer: None,
        }
    }
}

impl LinkControl for NetLink {
    fn is_connected(&mut self) -> bool {
        default_route_interface().is_some()
    }

    fn announce(&mut self) -> Result<()> {
        if let Some(child) = self.announcer.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()), // still running
                Ok(Some(status)) => debug!(?status, "announcer exited, respawning"),
                Err(e) => warn!(error = %e, "announcer status check failed"),
            }
        }

        let child = Command::new("avahi-publish-service")
            .arg(&self.service_name)
            .arg("_http._tcp")
            .arg(self.http_port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn avahi-publish-service. Is avahi installed?")?;
        info!(service = %self.service_name, "discovery announced");
        self.announcer = Some(child);
        Ok(())
    }

    fn reconnect(&mut self) -> Result<()> {
        // Fire-and-forget: nmcli can block for seconds and the control
        // loop must keep polling
        Command::new("nmcli")
            .args(["device", "connect", &self.wifi_interface])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn nmcli for reconnect")?;
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<()> {
        Command::new("sh")
            .args([
                "-c",
                "nmcli radio wifi off && sleep 2 && nmcli radio wifi on",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn nmcli for radio reset")?;
        Ok(())
    }
}

impl Drop for NetLink {
    fn drop(&mut self) {
        if let Some(mut child) = self.announcer.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Read the default route interface from /proc/net/route (Linux).
/// Returns None on non-Linux or if no default route exists.
fn default_route_interface() -> Option<String> {
    default_route_from(Path::new("/proc/net/route"))
}

fn default_route_from(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Destination 00000000 = default route
        if fields.len() >= 2 && fields[1] == "00000000" {
            return Some(fields[0].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct MockState {
        connected: AtomicBool,
        announces: AtomicU32,
        reconnects: AtomicU32,
        resets: AtomicU32,
    }

    /// Shares state with the test body so the supervisor can own its copy.
    #[derive(Clone, Default)]
    struct MockLink(Arc<MockState>);

    impl MockLink {
        fn set_connected(&self, up: bool) {
            self.0.connected.store(up, Ordering::SeqCst);
        }
        fn announces(&self) -> u32 {
            self.0.announces.load(Ordering::SeqCst)
        }
        fn reconnects(&self) -> u32 {
            self.0.reconnects.load(Ordering::SeqCst)
        }
        fn resets(&self) -> u32 {
            self.0.resets.load(Ordering::SeqCst)
        }
    }

    impl LinkControl for MockLink {
        fn is_connected(&mut self) -> bool {
            self.0.connected.load(Ordering::SeqCst)
        }
        fn announce(&mut self) -> Result<()> {
            self.0.announces.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn reconnect(&mut self) -> Result<()> {
            self.0.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn hard_reset(&mut self) -> Result<()> {
            self.0.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn cfg() -> SupervisorConfig {
        SupervisorConfig {
            check_interval: Duration::from_secs(15),
            retry_ceiling: 3,
        }
    }

    #[test]
    fn checks_are_rate_limited_to_the_interval() {
        let link = MockLink::default();
        link.set_connected(true);
        let mut sup = LinkSupervisor::new(link.clone(), cfg());
        let t0 = Instant::now();

        sup.tick(t0, false);
        sup.tick(t0 + Duration::from_secs(5), false); // inside interval
        sup.tick(t0 + Duration::from_secs(14), false);
        assert_eq!(link.announces(), 1);

        sup.tick(t0 + Duration::from_secs(15), false);
        assert_eq!(link.announces(), 2);
    }

    #[test]
    fn success_resets_failures_and_reannounces() {
        let link = MockLink::default();
        let mut sup = LinkSupervisor::new(link.clone(), cfg());
        let t0 = Instant::now();
        let step = Duration::from_secs(15);

        sup.tick(t0, false); // down: 1 soft
        sup.tick(t0 + step, false); // down: 2 soft
        assert!(!sup.is_connected());

        link.set_connected(true);
        sup.tick(t0 + step * 2, false);
        assert!(sup.is_connected());
        assert_eq!(link.announces(), 1);

        link.set_connected(false);
        // Counter was reset: two more soft attempts before the ceiling
        sup.tick(t0 + step * 3, false);
        sup.tick(t0 + step * 4, false);
        assert_eq!(link.reconnects(), 4);
        assert_eq!(link.resets(), 0);
    }

    #[test]
    fn ceiling_escalates_to_hard_reset_and_restarts_count() {
        let link = MockLink::default();
        let mut sup = LinkSupervisor::new(link.clone(), cfg());
        let t0 = Instant::now();
        let step = Duration::from_secs(15);

        for i in 0..6 {
            sup.tick(t0 + step * i, false);
        }
        // ceiling 3: soft, soft, RESET, soft, soft, RESET
        assert_eq!(link.reconnects(), 4);
        assert_eq!(link.resets(), 2);
    }

    #[test]
    fn reconnects_withheld_while_session_active() {
        let link = MockLink::default();
        let mut sup = LinkSupervisor::new(link.clone(), cfg());
        let t0 = Instant::now();
        let step = Duration::from_secs(15);

        for i in 0..10 {
            sup.tick(t0 + step * i, true);
        }
        assert_eq!(link.reconnects(), 0);
        assert_eq!(link.resets(), 0);
        assert!(!sup.is_connected()); // link still marked down

        // Session over: recovery resumes
        sup.tick(t0 + step * 10, false);
        assert_eq!(link.reconnects(), 1);
    }

    #[test]
    fn parses_default_route_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("route");
        std::fs::write(
            &path,
            "Iface\tDestination\tGateway\tFlags\n\
             wlan0\t000A0A0A\t00000000\t0001\n\
             wlan0\t00000000\t010A0A0A\t0003\n",
        )
        .unwrap();
        assert_eq!(default_route_from(&path), Some("wlan0".to_string()));

        std::fs::write(&path, "Iface\tDestination\n").unwrap();
        assert_eq!(default_route_from(&path), None);
        assert_eq!(default_route_from(&dir.path().join("missing")), None);
    }
}

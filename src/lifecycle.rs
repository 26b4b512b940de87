//! Access point lifecycle
//!
//! `up` walks stopped -> starting -> running and stays there until the
//! shutdown future resolves; `down` stops whatever session exists. Once
//! startup begins touching the host, teardown runs on every exit path:
//! success, failure, signal, or the AP daemon dying underneath us.

use crate::backup;
use crate::command::CommandRunner;
use crate::config::{ApConfig, Method, RuntimePaths};
use crate::error::{ApError, ApResult, StepContext};
use crate::interface::resolve_interfaces;
use crate::session::{self, SessionPhase, SessionRecord};
use crate::topology::{self, Host};
use crate::validation;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Tools that must be installed before anything is attempted
pub const REQUIRED_TOOLS: [&str; 6] = ["ip", "iw", "hostapd", "dnsmasq", "iptables", "sysctl"];

/// How often the AP daemon is checked while running
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

/// How long `down` waits for a running session to tear itself down
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_POLL_ATTEMPTS: u32 = 20;

/// Fail unless we are root and every required tool is installed
pub fn check_preconditions(runner: &dyn CommandRunner) -> ApResult<()> {
    if !runner.is_root() {
        return Err(ApError::Precondition(
            "must be run as root (try sudo)".to_string(),
        ));
    }

    let missing: Vec<&str> = REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| !runner.command_exists(tool))
        .collect();
    if !missing.is_empty() {
        return Err(ApError::Precondition(format!(
            "required commands not found: {}",
            missing.join(", ")
        )));
    }

    Ok(())
}

/// Resolves on SIGTERM, SIGINT or SIGHUP. Handlers are installed immediately.
pub fn shutdown_signal() -> ApResult<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down"),
            _ = sighup.recv() => info!("Received SIGHUP, shutting down"),
        }
    })
}

pub struct LifecycleController {
    runner: Arc<dyn CommandRunner>,
    config: ApConfig,
    host: Host,
    phase: SessionPhase,
    session: Option<SessionRecord>,
}

impl LifecycleController {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ApConfig) -> Self {
        Self {
            host: Host::new(runner.clone(), &config.paths),
            runner,
            config,
            phase: SessionPhase::Stopped,
            session: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Start the access point and keep it running until `shutdown` resolves.
    ///
    /// Returns `Ok` after a clean shutdown. Any failure after the host was
    /// touched is returned only once teardown has run.
    pub async fn up<F>(&mut self, shutdown: F) -> ApResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.phase != SessionPhase::Stopped {
            return Err(ApError::AlreadyRunning {
                pid: std::process::id() as i32,
            });
        }

        validation::validate_config(&self.config).step("invalid configuration")?;
        let interfaces = resolve_interfaces(self.runner.clone(), &self.config).await?;
        session::prepare_runtime_dir(&self.config.paths.runtime_dir).await?;
        session::acquire_lock(&self.config.paths.lock_file, self.runner.as_ref()).await?;

        self.phase = SessionPhase::Starting;
        let mut record = SessionRecord::new(
            self.config.method,
            interfaces,
            self.config.gateway_cidr(),
        );
        if self.config.method == Method::Bridge {
            record.bridge = Some(self.config.bridge_name.clone());
            record.lan = self.config.lan_interface.clone();
        }
        self.session = Some(record);

        tokio::pin!(shutdown);

        let started = tokio::select! {
            res = self.start() => Some(res),
            _ = &mut shutdown => None,
        };

        match started {
            None => {
                warn!("Interrupted during startup");
                self.teardown().await;
                return Ok(());
            }
            Some(Err(e)) => {
                error!("Startup failed: {}", e);
                self.teardown().await;
                return Err(e);
            }
            Some(Ok(())) => {}
        }

        self.phase = SessionPhase::Running;
        if let Some(record) = self.session.as_mut() {
            record.phase = SessionPhase::Running;
            if let Err(e) = record.save(&self.config.paths.session_file).await {
                warn!("Could not update session record: {}", e);
            }
        }
        info!(
            ssid = %self.config.ssid,
            method = %self.config.method,
            "Access point is up"
        );

        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                _ = sleep(SUPERVISE_INTERVAL) => {
                    if !self.host.hostapd.is_running().await {
                        break Err(ApError::Startup("hostapd exited unexpectedly".to_string()));
                    }
                }
            }
        };

        self.teardown().await;
        outcome
    }

    async fn start(&mut self) -> ApResult<()> {
        let config = &self.config;
        let host = &self.host;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ApError::Configuration("no session record".to_string()))?;
        let wireless = session.interfaces.wireless.clone();

        session
            .save(&config.paths.session_file)
            .await
            .step("saving session")?;

        host.routing
            .set_ip_forward(true)
            .await
            .step("enabling IPv4 forwarding")?;
        host.links
            .up(&wireless)
            .await
            .step("bringing up wireless interface")?;
        if let Err(e) = host.wifi.set_power_save(&wireless, false).await {
            warn!(interface = %wireless, "Power save left unchanged: {}", e);
        }

        host.hostapd
            .write_config(config, &wireless)
            .await
            .step("writing hostapd config")?;

        let topology = topology::for_method(config.method);
        topology::apply(
            topology.as_ref(),
            host,
            config,
            session,
            &config.paths.session_file,
        )
        .await?;
        topology
            .configure_ap(host, config)
            .await
            .step("finishing hostapd config")?;

        host.hostapd.start(config.grace_period).await
    }

    /// Stop the current session. With no session this is a no-op.
    pub async fn down(&mut self) -> ApResult<()> {
        let paths = &self.config.paths;

        if !tokio::fs::try_exists(&paths.runtime_dir).await? {
            info!("No access point session is running");
            return Ok(());
        }
        session::check_runtime_dir(&paths.runtime_dir).await?;

        if let Some(pid) = session::lock_holder(&paths.lock_file, self.runner.as_ref()).await {
            info!(pid, "Asking running session to stop");
            self.runner
                .run("kill", &["-TERM", &pid.to_string()])
                .await?;

            for _ in 0..STOP_POLL_ATTEMPTS {
                sleep(STOP_POLL_INTERVAL).await;
                if !self.runner.process_alive(pid) {
                    info!("Access point stopped");
                    return Ok(());
                }
            }
            return Err(ApError::Timeout(format!(
                "session (pid {}) did not stop",
                pid
            )));
        }

        match SessionRecord::load(&paths.session_file).await? {
            Some(record) => {
                warn!(pid = record.pid, "Cleaning up after a session that is no longer running");
                self.session = Some(record);
                self.teardown().await;
                info!("Access point stopped");
            }
            None => info!("No access point session is running"),
        }

        Ok(())
    }

    /// Undo the current session. Every step tolerates having nothing to undo.
    pub async fn teardown(&mut self) {
        let Some(mut record) = self.session.take() else {
            return;
        };

        self.phase = SessionPhase::Stopping;
        record.phase = SessionPhase::Stopping;
        if let Err(e) = record.save(&self.config.paths.session_file).await {
            warn!("Could not update session record: {}", e);
        }

        info!("Tearing down access point");
        run_teardown(&self.host, &self.config.paths, &record).await;

        self.phase = SessionPhase::Stopped;
    }
}

async fn run_teardown(host: &Host, paths: &RuntimePaths, record: &SessionRecord) {
    let wireless = &record.interfaces.wireless;

    host.hostapd.stop().await;
    host.dhcp.stop().await;

    host.firewall.flush_all().await;
    if let Err(e) = host.routing.set_ip_forward(false).await {
        warn!("IPv4 forwarding not disabled: {}", e);
    }

    if let Err(e) = host.links.flush_addrs(wireless).await {
        warn!(interface = %wireless, "Addresses not flushed: {}", e);
    }
    if let Err(e) = host.links.down(wireless).await {
        warn!(interface = %wireless, "Interface not brought down: {}", e);
    }

    topology::for_method(record.method)
        .teardown(host, record)
        .await;

    if let Some(backup) = &record.backup {
        if let Err(e) = backup::restore(backup).await {
            error!(path = %backup.original.display(), "Restore failed: {}", e);
        }
    }

    for path in paths
        .temporary_artifacts()
        .into_iter()
        .chain([paths.session_file.as_path(), paths.lock_file.as_path()])
    {
        if let Err(e) = session::remove_file_if_exists(path).await {
            warn!(path = %path.display(), "Not removed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fake::FakeRunner;
    use crate::command::SystemRunner;
    use crate::topology::testutil::config;
    use std::path::Path;
    use tempfile::TempDir;

    /// Resolves once the session record reports `running`
    async fn when_running(path: &Path) {
        loop {
            if let Ok(Some(rec)) = SessionRecord::load(path).await {
                if rec.phase == SessionPhase::Running {
                    return;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn controller(cfg: &ApConfig) -> (Arc<FakeRunner>, LifecycleController) {
        let runner = Arc::new(FakeRunner::new());
        let ctl = LifecycleController::new(runner.clone(), cfg.clone());
        (runner, ctl)
    }

    #[test]
    fn test_preconditions() {
        let mut runner = FakeRunner::new();
        assert!(check_preconditions(&runner).is_ok());

        runner.missing = vec!["dnsmasq".to_string(), "iw".to_string()];
        match check_preconditions(&runner) {
            Err(ApError::Precondition(msg)) => assert!(msg.ends_with("iw, dnsmasq")),
            other => panic!("unexpected result: {:?}", other),
        }

        runner.root = false;
        assert!(matches!(check_preconditions(&runner), Err(ApError::Precondition(_))));
    }

    #[tokio::test]
    async fn test_nat_up_then_shutdown() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        let (runner, mut ctl) = controller(&cfg);

        ctl.up(when_running(&cfg.paths.session_file)).await.unwrap();
        assert_eq!(ctl.phase(), SessionPhase::Stopped);

        let calls = runner.calls();
        let first = |line: &str| calls.iter().position(|c| c == line).unwrap();
        assert_eq!(calls[0], "sysctl -w net.ipv4.ip_forward=1");
        assert!(first("ip link set dev wlan0 up") < first("iw dev wlan0 set power_save off"));
        assert!(runner.called("iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE"));

        let launch = calls.iter().position(|c| c.starts_with("hostapd -B -P")).unwrap();
        let flush = first("iptables -t nat -F");
        assert!(launch < flush);
        assert!(first("sysctl -w net.ipv4.ip_forward=0") > launch);
        assert!(first("ip addr flush dev wlan0") < first("ip link set dev wlan0 down"));
        assert!(!runner.called("ip link delete br0 type bridge"));

        for path in cfg.paths.temporary_artifacts() {
            assert!(!path.exists(), "{} left behind", path.display());
        }
        assert!(!cfg.paths.session_file.exists());
        assert!(!cfg.paths.lock_file.exists());
        assert!(!cfg.paths.system_dhcp_conf.exists());
    }

    #[tokio::test]
    async fn test_bridge_up_then_shutdown() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "bridge");
        let (runner, mut ctl) = controller(&cfg);

        let running = async {
            when_running(&cfg.paths.session_file).await;
            let conf = std::fs::read_to_string(&cfg.paths.hostapd_conf).unwrap();
            assert!(conf.ends_with("bridge=br0\n"));
            let dhcp = std::fs::read_to_string(&cfg.paths.dhcp_conf).unwrap();
            assert!(dhcp.starts_with("interface=br0\n"));
        };
        ctl.up(running).await.unwrap();

        assert!(runner.called("ip link set dev eth0 master br0"));
        assert!(runner.called("ip addr add 192.168.50.1/24 dev br0"));
        let calls = runner.calls();
        let delete = calls.iter().position(|c| c == "ip link delete br0 type bridge").unwrap();
        let wlan_down = calls.iter().position(|c| c == "ip link set dev wlan0 down").unwrap();
        assert!(wlan_down < delete);
    }

    #[tokio::test]
    async fn test_system_dhcp_config_restored() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "proxy_arp");
        std::fs::create_dir_all(cfg.paths.system_dhcp_conf.parent().unwrap()).unwrap();
        std::fs::write(&cfg.paths.system_dhcp_conf, "conf-dir=/etc/dnsmasq.d\n").unwrap();
        let (runner, mut ctl) = controller(&cfg);

        let system = cfg.paths.system_dhcp_conf.clone();
        let running = async {
            when_running(&cfg.paths.session_file).await;
            let live = std::fs::read_to_string(&system).unwrap();
            assert!(live.starts_with("interface=wlan0\n"));
        };
        ctl.up(running).await.unwrap();

        assert_eq!(std::fs::read_to_string(&system).unwrap(), "conf-dir=/etc/dnsmasq.d\n");
        assert!(!backup::backup_path(&system).exists());
        assert!(runner.called("sysctl -w net.ipv4.conf.eth0.proxy_arp=0"));
    }

    #[tokio::test]
    async fn test_dead_hostapd_fails_and_tears_down() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        let mut runner = FakeRunner::new();
        runner.hostapd_pid = None;
        let runner = Arc::new(runner);
        let mut ctl = LifecycleController::new(runner.clone(), cfg.clone());

        let err = ctl.up(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ApError::Startup(_)));
        assert_ne!(err.exit_code(), 0);

        assert!(runner.called("systemctl stop dnsmasq"));
        assert!(runner.called("iptables -t filter -F"));
        assert!(runner.called("iptables -t nat -F"));
        assert!(!cfg.paths.dhcp_conf.exists());
        assert!(!cfg.paths.session_file.exists());
        assert_eq!(ctl.phase(), SessionPhase::Stopped);
    }

    #[tokio::test]
    async fn test_hostapd_dying_while_running() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        let (runner, mut ctl) = controller(&cfg);

        let killer = async {
            when_running(&cfg.paths.session_file).await;
            runner.exit(4242);
        };
        let (res, ()) = tokio::join!(ctl.up(std::future::pending()), killer);
        assert!(matches!(res, Err(ApError::Startup(msg)) if msg.contains("unexpectedly")));
        assert!(runner.called("iptables -t nat -F"));
        assert!(!cfg.paths.lock_file.exists());
    }

    #[tokio::test]
    async fn test_failed_setup_step_rolls_back() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        let (runner, mut ctl) = controller(&cfg);
        runner.fail_on("iptables -t nat -A");

        let err = ctl.up(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ApError::Configuration(_)));
        assert!(!runner.calls().iter().any(|c| c.starts_with("hostapd")));
        assert!(runner.called("ip addr flush dev wlan0"));
        assert!(!cfg.paths.session_file.exists());
    }

    #[tokio::test]
    async fn test_second_up_is_rejected_without_mutation() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        session::prepare_runtime_dir(&cfg.paths.runtime_dir).await.unwrap();
        std::fs::write(&cfg.paths.lock_file, "31337\n").unwrap();
        let (runner, mut ctl) = controller(&cfg);
        runner.spawn(31337, "apctl");

        let err = ctl.up(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ApError::AlreadyRunning { pid: 31337 }));
        assert!(runner.calls().is_empty());
        assert_eq!(std::fs::read_to_string(&cfg.paths.lock_file).unwrap(), "31337\n");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_without_mutation() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), "nat");
        cfg.passphrase = "1234567".to_string();
        let (runner, mut ctl) = controller(&cfg);

        let err = ctl.up(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, ApError::Configuration(_)));
        assert!(runner.calls().is_empty());
        assert!(!cfg.paths.runtime_dir.exists());
    }

    #[tokio::test]
    async fn test_down_without_session_is_noop() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        let (runner, mut ctl) = controller(&cfg);

        ctl.down().await.unwrap();
        ctl.down().await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_down_cleans_up_crashed_session() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "bridge");
        let mut record = SessionRecord::new(
            Method::Bridge,
            crate::topology::testutil::binding(),
            cfg.gateway_cidr(),
        );
        record.pid = 31337;
        record.phase = SessionPhase::Running;
        record.bridge = Some("br0".to_string());
        record.lan = Some("eth1".to_string());
        session::prepare_runtime_dir(&cfg.paths.runtime_dir).await.unwrap();
        record.save(&cfg.paths.session_file).await.unwrap();
        std::fs::write(&cfg.paths.hostapd_conf, "interface=wlan0\n").unwrap();

        let (runner, mut ctl) = controller(&cfg);
        ctl.down().await.unwrap();

        assert!(runner.called("ip link delete br0 type bridge"));
        assert!(runner.called("ip link set dev eth1 down"));
        assert!(runner.called("iptables -t mangle -F"));
        assert!(!cfg.paths.session_file.exists());
        assert!(!cfg.paths.hostapd_conf.exists());
    }

    #[tokio::test]
    async fn test_down_signals_live_session() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        session::prepare_runtime_dir(&cfg.paths.runtime_dir).await.unwrap();
        std::fs::write(&cfg.paths.lock_file, "31337\n").unwrap();
        let (runner, mut ctl) = controller(&cfg);
        runner.spawn(31337, "apctl");

        ctl.down().await.unwrap();
        assert_eq!(runner.calls(), vec!["kill -TERM 31337"]);
    }

    #[tokio::test]
    async fn test_down_leaves_recycled_lock_pid_alone() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        session::prepare_runtime_dir(&cfg.paths.runtime_dir).await.unwrap();

        let mut other = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&cfg.paths.lock_file, format!("{}\n", other.id())).unwrap();

        let mut ctl = LifecycleController::new(Arc::new(SystemRunner::new()), cfg.clone());
        let res = ctl.down().await;
        let still_running = other.try_wait().unwrap().is_none();
        let _ = other.kill();
        let _ = other.wait();

        assert!(res.is_ok(), "down failed: {:?}", res);
        assert!(still_running);
    }

    #[tokio::test]
    async fn test_down_refuses_shared_runtime_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        std::fs::create_dir_all(&cfg.paths.runtime_dir).unwrap();
        std::fs::set_permissions(&cfg.paths.runtime_dir, std::fs::Permissions::from_mode(0o777))
            .unwrap();
        std::fs::write(&cfg.paths.hostapd_pid, "1\n").unwrap();
        let (runner, mut ctl) = controller(&cfg);

        assert!(matches!(ctl.down().await, Err(ApError::Precondition(_))));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_signal_during_startup_tears_down() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path(), "bridge");
        cfg.grace_period = Duration::from_secs(5);
        let (runner, mut ctl) = controller(&cfg);

        ctl.up(sleep(Duration::from_millis(200))).await.unwrap();

        assert!(runner.calls().iter().any(|c| c.starts_with("hostapd -B")));
        assert!(runner.called("ip link delete br0 type bridge"));
        assert!(runner.called("iptables -t nat -F"));
        assert!(!cfg.paths.session_file.exists());
        assert!(!cfg.paths.lock_file.exists());
        assert_eq!(ctl.phase(), SessionPhase::Stopped);
    }
}

//! Controller ownership state machine (C4).
//!
//! Replaces the source's nullable `controller_address`/`controller_time`
//! pair with a tagged variant, per the design note in `DESIGN.md`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::backend::{regs, RegisterBackend};

/// Current controlling peer, or lack thereof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Controller {
    Uncontrolled,
    Controlled {
        peer: SocketAddr,
        last_contact: Instant,
    },
}

impl Default for Controller {
    fn default() -> Self {
        Controller::Uncontrolled
    }
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate heartbeat expiry and decide write access for `source`,
    /// before the inbound command is handled. On expiry this zeroes
    /// `CONTROL_CHANNEL_PRIVILEGE` in the backend and transitions to
    /// `Uncontrolled`, granting the current packet write access.
    pub fn admit(
        &mut self,
        source: SocketAddr,
        now: Instant,
        heartbeat_timeout: Duration,
        backend: &mut dyn RegisterBackend,
    ) -> bool {
        match *self {
            Controller::Controlled { peer, last_contact } => {
                if now.saturating_duration_since(last_contact) > heartbeat_timeout {
                    warn!(%peer, "Heartbeat timeout");
                    if let Err(err) = backend.write_register(regs::CONTROL_CHANNEL_PRIVILEGE, 0) {
                        warn!(?err, "failed to clear control privilege on heartbeat timeout");
                    }
                    *self = Controller::Uncontrolled;
                    true
                } else {
                    source == peer
                }
            }
            Controller::Uncontrolled => true,
        }
    }

    /// Refresh the heartbeat deadline. Only the current controller's own
    /// reads extend its lease; other peers' traffic is a no-op here.
    pub fn refresh_heartbeat(&mut self, source: SocketAddr, now: Instant) {
        if let Controller::Controlled { peer, last_contact } = self {
            if *peer == source {
                *last_contact = now;
            }
        }
    }

    /// Re-evaluate ownership after the command has been handled, based on
    /// the (possibly just-written) privilege register value.
    pub fn settle(&mut self, source: SocketAddr, now: Instant, privilege: u32) {
        match (*self, privilege) {
            (Controller::Uncontrolled, p) if p != 0 => {
                info!(peer = %source, "New controller");
                *self = Controller::Controlled {
                    peer: source,
                    last_contact: now,
                };
            }
            (Controller::Controlled { .. }, 0) => {
                info!("Controller releases");
                *self = Controller::Uncontrolled;
            }
            _ => {}
        }
    }

    /// Whether a peer currently holds the control channel.
    pub fn is_controlled(&self) -> bool {
        matches!(self, Controller::Controlled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FakeCamera;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn uncontrolled_admits_anyone_and_acquires_on_nonzero_privilege() {
        let mut backend = FakeCamera::new("s", None);
        let mut controller = Controller::new();
        let now = Instant::now();
        assert!(controller.admit(addr(1), now, Duration::from_secs(3), &mut backend));
        controller.settle(addr(1), now, 2);
        assert_eq!(
            controller,
            Controller::Controlled {
                peer: addr(1),
                last_contact: now
            }
        );
    }

    #[test]
    fn controlled_denies_other_peers() {
        let mut backend = FakeCamera::new("s", None);
        let now = Instant::now();
        let mut controller = Controller::Controlled {
            peer: addr(1),
            last_contact: now,
        };
        let write_access = controller.admit(addr(2), now, Duration::from_secs(3), &mut backend);
        assert!(!write_access);
    }

    #[test]
    fn heartbeat_expiry_releases_control_and_grants_access() {
        let mut backend = FakeCamera::new("s", None);
        backend
            .write_register(regs::CONTROL_CHANNEL_PRIVILEGE, 3)
            .unwrap();
        let earlier = Instant::now();
        let mut controller = Controller::Controlled {
            peer: addr(1),
            last_contact: earlier,
        };
        let later = earlier + Duration::from_millis(250);
        let write_access = controller.admit(addr(2), later, Duration::from_millis(100), &mut backend);
        assert!(write_access);
        assert_eq!(controller, Controller::Uncontrolled);
        assert_eq!(
            backend.read_register(regs::CONTROL_CHANNEL_PRIVILEGE).unwrap(),
            0
        );
    }

    #[test]
    fn controller_releases_when_privilege_zeroed() {
        let now = Instant::now();
        let mut controller = Controller::Controlled {
            peer: addr(1),
            last_contact: now,
        };
        controller.settle(addr(1), now, 0);
        assert_eq!(controller, Controller::Uncontrolled);
    }
}
